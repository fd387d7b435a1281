use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /segments/{token}
///
/// Serves a cached artifact to an external provider: 404 for an unknown
/// token, 410 once it has expired.
pub async fn fetch_segment(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<impl IntoResponse> {
    let blob = state.cache.fetch(&token).await?;
    tracing::debug!(bytes = blob.len(), "Serving cached segment");
    Ok(([(CONTENT_TYPE, "audio/mpeg")], blob))
}

//! Unauthenticated artifact fetch for external providers.

use axum::routing::get;
use axum::Router;

use crate::handlers::segments;
use crate::state::AppState;

/// `GET /segments/{token}` at root level, so the URL minted by the audio
/// pipeline (`{PUBLIC_BASE_URL}/segments/{token}`) resolves here.
pub fn router() -> Router<AppState> {
    Router::new().route("/segments/{token}", get(segments::fetch_segment))
}

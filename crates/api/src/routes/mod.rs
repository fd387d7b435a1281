pub mod health;
pub mod jobs;
pub mod segments;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                                      create
/// /jobs/{id}                                 get
/// /jobs/{id}/approve                         approve (POST)
/// /jobs/{id}/start                           start (POST)
/// /jobs/{id}/result                          final video download
/// /jobs/{id}/audio                           soundtrack download
/// /jobs/{id}/scenes/{scene_id}               update status (PUT), delete
/// /jobs/{id}/scenes/{scene_id}/regenerate    regenerate (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}

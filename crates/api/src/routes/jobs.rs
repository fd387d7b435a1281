//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{jobs, scenes};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /                                   -> create_job
/// GET    /{id}                               -> get_job
/// POST   /{id}/approve                       -> approve_job
/// POST   /{id}/start                         -> start_job
/// GET    /{id}/result                        -> download_result
/// GET    /{id}/audio                         -> download_audio
/// PUT    /{id}/scenes/{scene_id}             -> update_scene
/// DELETE /{id}/scenes/{scene_id}             -> delete_scene
/// POST   /{id}/scenes/{scene_id}/regenerate  -> regenerate_scene
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/approve", post(jobs::approve_job))
        .route("/{id}/start", post(jobs::start_job))
        .route("/{id}/result", get(jobs::download_result))
        .route("/{id}/audio", get(jobs::download_audio))
        .route(
            "/{id}/scenes/{scene_id}",
            put(scenes::update_scene).delete(scenes::delete_scene),
        )
        .route(
            "/{id}/scenes/{scene_id}/regenerate",
            post(scenes::regenerate_scene),
        )
}

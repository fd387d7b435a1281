//! Scene mutations. Each is rejected while the owning job is processing.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use storyreel_core::scene::SceneStatus;
use storyreel_core::types::DbId;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `PUT /jobs/{id}/scenes/{scene_id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateScene {
    pub status: SceneStatus,
}

/// PUT /api/v1/jobs/{id}/scenes/{scene_id}
pub async fn update_scene(
    State(state): State<AppState>,
    Path((job_id, scene_id)): Path<(DbId, DbId)>,
    Json(input): Json<UpdateScene>,
) -> AppResult<impl IntoResponse> {
    let scene = state
        .coordinator
        .scene_updated(job_id, scene_id, input.status)
        .await?;
    Ok(Json(DataResponse { data: scene }))
}

/// POST /api/v1/jobs/{id}/scenes/{scene_id}/regenerate
pub async fn regenerate_scene(
    State(state): State<AppState>,
    Path((job_id, scene_id)): Path<(DbId, DbId)>,
) -> AppResult<impl IntoResponse> {
    let scene = state.coordinator.scene_regenerate(job_id, scene_id).await?;
    Ok(Json(DataResponse { data: scene }))
}

/// DELETE /api/v1/jobs/{id}/scenes/{scene_id}
///
/// Returns the job with its recomputed progress.
pub async fn delete_scene(
    State(state): State<AppState>,
    Path((job_id, scene_id)): Path<(DbId, DbId)>,
) -> AppResult<impl IntoResponse> {
    let job = state.coordinator.scene_deleted(job_id, scene_id).await?;
    Ok(Json(DataResponse { data: job }))
}

//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use storyreel_core::audio::AudioErrorStrategy;
use storyreel_core::error::CoreError;
use storyreel_core::job::Job;
use storyreel_core::scene::{Scene, SceneSpec};
use storyreel_core::types::DbId;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJob {
    pub storyboard: Vec<SceneSpec>,
    /// Overrides the deployment's audio error strategy for this job.
    #[serde(default)]
    pub audio_error_strategy: Option<AudioErrorStrategy>,
}

/// A job with its scenes and which binary outputs are available.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub scenes: Vec<Scene>,
    pub has_result: bool,
    pub has_audio: bool,
    pub has_muxed_result: bool,
}

impl JobView {
    pub fn new(job: Job, scenes: Vec<Scene>) -> Self {
        Self {
            has_result: job.result.is_some(),
            has_audio: job.audio_track.is_some(),
            has_muxed_result: job.muxed_result.is_some(),
            job,
            scenes,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Persist a storyboard as a pending job. Returns 201.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJob>,
) -> AppResult<impl IntoResponse> {
    let (job, scenes) = state
        .coordinator
        .create_job(input.storyboard, input.audio_error_strategy)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobView::new(job, scenes),
        }),
    ))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let (job, scenes) = state.coordinator.job(job_id).await?;
    Ok(Json(DataResponse {
        data: JobView::new(job, scenes),
    }))
}

/// POST /api/v1/jobs/{id}/approve
pub async fn approve_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.coordinator.approve(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/start
///
/// Returns 202 once rendering has been dispatched; poll `GET /jobs/{id}`
/// for progress.
pub async fn start_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.coordinator.start(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Downloads
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/result
///
/// The muxed video when a soundtrack was merged, otherwise the stitched one.
pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let (job, _) = state.coordinator.job(job_id).await?;
    let video = job
        .muxed_result
        .or(job.result)
        .ok_or(CoreError::NotFound {
            entity: "job result",
            id: job_id,
        })?;
    Ok(([(CONTENT_TYPE, "video/mp4")], video))
}

/// GET /api/v1/jobs/{id}/audio
pub async fn download_audio(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let (job, _) = state.coordinator.job(job_id).await?;
    let audio = job.audio_track.ok_or(CoreError::NotFound {
        entity: "job audio track",
        id: job_id,
    })?;
    Ok(([(CONTENT_TYPE, "audio/mpeg")], audio))
}

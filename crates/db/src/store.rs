//! The persistence seam between the coordinator and storage.

use async_trait::async_trait;
use storyreel_core::audio::AudioErrorStrategy;
use storyreel_core::error::CoreError;
use storyreel_core::job::Job;
use storyreel_core::scene::{Scene, SceneSpec};
use storyreel_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row could not be mapped back onto a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Input for persisting a freshly created job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub storyboard: Vec<SceneSpec>,
    pub audio_error_strategy: Option<AudioErrorStrategy>,
    pub cost_estimate: Option<f64>,
}

/// Storage for job aggregates and their scenes.
///
/// Implementations only persist what they are given; lifecycle rules are
/// enforced by the caller before anything is saved.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a pending job and one pending scene per storyboard entry.
    async fn create_job(&self, input: NewJob) -> Result<(Job, Vec<Scene>), StoreError>;

    async fn load_job(&self, job_id: DbId) -> Result<Job, StoreError>;

    /// Scenes of a job ordered by storyboard position.
    async fn load_scenes(&self, job_id: DbId) -> Result<Vec<Scene>, StoreError>;

    /// Like [`JobStore::load_scenes`] but every `clip` is `None`.
    ///
    /// Scenes loaded this way must not be handed back to
    /// [`JobStore::save_scene`] unless their clip was set again first.
    async fn load_scene_states(&self, job_id: DbId) -> Result<Vec<Scene>, StoreError>;

    /// Write the job's status and progress snapshot.
    async fn save_progress(&self, job: &Job) -> Result<(), StoreError>;

    /// Write the job's stitched video, soundtrack and muxed video.
    async fn save_outputs(&self, job: &Job) -> Result<(), StoreError>;

    async fn save_scene(&self, scene: &Scene) -> Result<(), StoreError>;

    async fn delete_scene(&self, job_id: DbId, scene_id: DbId) -> Result<(), StoreError>;
}

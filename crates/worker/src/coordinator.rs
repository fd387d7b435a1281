use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storyreel_core::audio::AudioErrorStrategy;
use storyreel_core::error::CoreError;
use storyreel_core::job::{Job, JobStatus, ProcessingStage};
use storyreel_core::progress::ProgressSnapshot;
use storyreel_core::render::estimate_cost;
use storyreel_core::scene::{Scene, SceneSpec, SceneStatus};
use storyreel_core::types::DbId;
use storyreel_db::{JobStore, NewJob};
use storyreel_events::{EventBus, PipelineEvent};
use storyreel_pipeline::{AudioPipeline, RenderDispatcher, StitchAssembler};
use tokio_util::task::TaskTracker;

use crate::error::CoordinatorError;

pub(crate) const RENDERING: JobStatus = JobStatus::Processing(ProcessingStage::Rendering);

/// Drives jobs from approval to a terminal status.
///
/// Cheap to clone; every clone shares the same lock table and background
/// task tracker.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) dispatcher: RenderDispatcher,
    pub(crate) stitcher: StitchAssembler,
    pub(crate) audio: AudioPipeline,
    pub(crate) min_success_scenes: usize,
    locks: Mutex<HashMap<DbId, Arc<tokio::sync::Mutex<()>>>>,
    pub(crate) tasks: TaskTracker,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        events: Arc<EventBus>,
        dispatcher: RenderDispatcher,
        stitcher: StitchAssembler,
        audio: AudioPipeline,
        min_success_scenes: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                events,
                dispatcher,
                stitcher,
                audio,
                min_success_scenes: min_success_scenes.max(1),
                locks: Mutex::new(HashMap::new()),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Validate a storyboard and persist it as a pending job.
    pub async fn create_job(
        &self,
        storyboard: Vec<SceneSpec>,
        audio_error_strategy: Option<AudioErrorStrategy>,
    ) -> Result<(Job, Vec<Scene>), CoordinatorError> {
        if storyboard.is_empty() {
            return Err(CoreError::Validation("Storyboard must contain at least one scene".into()).into());
        }
        for (index, spec) in storyboard.iter().enumerate() {
            spec.validate().map_err(|e| match e {
                CoreError::Validation(msg) => CoreError::Validation(format!("Scene {index}: {msg}")),
                other => other,
            })?;
        }

        let cost = estimate_cost(&storyboard, self.inner.dispatcher.default_model());
        let (job, scenes) = self
            .inner
            .store
            .create_job(NewJob {
                storyboard,
                audio_error_strategy,
                cost_estimate: Some(cost),
            })
            .await?;

        tracing::info!(job_id = job.id, scenes = scenes.len(), cost_estimate = cost, "Job created");
        Ok((job, scenes))
    }

    /// Current job state with its scenes in storyboard order.
    pub async fn job(&self, job_id: DbId) -> Result<(Job, Vec<Scene>), CoordinatorError> {
        let job = self.inner.store.load_job(job_id).await?;
        let scenes = self.inner.store.load_scenes(job_id).await?;
        Ok((job, scenes))
    }

    /// External approval: `pending` to `approved`.
    pub async fn approve(&self, job_id: DbId) -> Result<Job, CoordinatorError> {
        let lock = self.inner.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.inner.store.load_job(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(CoreError::Validation(format!(
                "Job {job_id} can only be approved while pending (status: {})",
                job.status
            ))
            .into());
        }
        let scenes = self.inner.store.load_scene_states(job_id).await?;
        self.inner.advance(&mut job, &scenes, JobStatus::Approved).await?;
        Ok(job)
    }

    /// Begin processing an approved job.
    ///
    /// Returns once the job is in `rendering`; the render fan-out and every
    /// later stage continue in the background.
    pub async fn start(&self, job_id: DbId) -> Result<Job, CoordinatorError> {
        let (job, batch) = {
            let lock = self.inner.job_lock(job_id);
            let _guard = lock.lock().await;

            let mut job = self.inner.store.load_job(job_id).await?;
            if job.status != JobStatus::Approved {
                return Err(CoreError::Validation(format!(
                    "Job {job_id} must be approved before it can start (status: {})",
                    job.status
                ))
                .into());
            }

            let mut scenes = self.inner.store.load_scenes(job_id).await?;
            if scenes.iter().all(Scene::is_rendered) {
                return Err(CoreError::Validation(format!("Job {job_id} has no scenes left to render")).into());
            }

            // Nothing renders while the job is approved, so every scene without
            // a clip is dispatched, including ones whose status was set by hand.
            let mut batch = Vec::new();
            for scene in scenes.iter_mut().filter(|s| !s.is_rendered()) {
                if scene.status != SceneStatus::Pending {
                    tracing::debug!(
                        job_id,
                        scene_id = scene.id,
                        status = scene.status.as_str(),
                        "Requeueing unrendered scene"
                    );
                    scene.requeue();
                }
                scene.mark_processing()?;
                self.inner.store.save_scene(scene).await?;
                batch.push((scene.id, scene.spec.clone()));
            }
            self.inner.advance(&mut job, &scenes, RENDERING).await?;
            (job, batch)
        };

        tracing::info!(job_id, scenes = batch.len(), "Dispatching renders");
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(inner.drive(job_id, batch));
        Ok(job)
    }

    /// Apply an externally requested scene status change.
    pub async fn scene_updated(
        &self,
        job_id: DbId,
        scene_id: DbId,
        status: SceneStatus,
    ) -> Result<Scene, CoordinatorError> {
        self.inner
            .mutate_scene(job_id, scene_id, |scene| scene.apply_status(status))
            .await
    }

    /// Reset a scene to `pending`, dropping its handle and clip.
    pub async fn scene_regenerate(&self, job_id: DbId, scene_id: DbId) -> Result<Scene, CoordinatorError> {
        self.inner.mutate_scene(job_id, scene_id, Scene::regenerate).await
    }

    pub async fn scene_deleted(&self, job_id: DbId, scene_id: DbId) -> Result<Job, CoordinatorError> {
        let lock = self.inner.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.inner.store.load_job(job_id).await?;
        job.ensure_idle()?;
        let mut scenes = self.inner.store.load_scene_states(job_id).await?;
        if !scenes.iter().any(|s| s.id == scene_id) {
            return Err(CoreError::NotFound {
                entity: "scene",
                id: scene_id,
            }
            .into());
        }

        self.inner.store.delete_scene(job_id, scene_id).await?;
        scenes.retain(|s| s.id != scene_id);
        self.inner.refresh_progress(&mut job, &scenes).await?;
        tracing::info!(job_id, scene_id, remaining = scenes.len(), "Scene deleted");
        Ok(job)
    }

    /// Stop accepting background work and wait up to `grace` for running
    /// stages to finish. Returns `false` if some were still running.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.tasks.close();
        let drained = tokio::time::timeout(grace, self.inner.tasks.wait()).await.is_ok();
        if !drained {
            tracing::warn!(running = self.inner.tasks.len(), "Background stages still running at shutdown");
        }
        drained
    }
}

impl Inner {
    /// The lock serializing every mutation of `job_id`.
    ///
    /// Entries nobody holds are dropped on the way in, so the table only
    /// carries jobs with a mutation or background stage in flight.
    pub(crate) fn job_lock(&self, job_id: DbId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(job_id).or_default())
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Move `job` to `next`, recompute its progress, persist it and publish
    /// the change. Callers hold the job lock.
    pub(crate) async fn advance(
        &self,
        job: &mut Job,
        scenes: &[Scene],
        next: JobStatus,
    ) -> Result<(), CoordinatorError> {
        let from = job.status;
        job.transition(next)?;
        job.progress = ProgressSnapshot::recompute(next, scenes, &job.progress);
        self.store.save_progress(job).await?;

        tracing::info!(job_id = job.id, from = %from, to = %next, "Job status changed");
        self.events.publish(PipelineEvent::status_changed(job.id, from, next));
        Ok(())
    }

    /// Recompute progress for the current status and persist it.
    pub(crate) async fn refresh_progress(&self, job: &mut Job, scenes: &[Scene]) -> Result<(), CoordinatorError> {
        job.progress = ProgressSnapshot::recompute(job.status, scenes, &job.progress);
        job.updated_at = chrono::Utc::now();
        self.store.save_progress(job).await?;
        Ok(())
    }

    async fn mutate_scene<F>(&self, job_id: DbId, scene_id: DbId, apply: F) -> Result<Scene, CoordinatorError>
    where
        F: FnOnce(&mut Scene) -> Result<(), CoreError>,
    {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.store.load_job(job_id).await?;
        job.ensure_idle()?;
        let mut scenes = self.store.load_scenes(job_id).await?;

        let scene = scenes
            .iter_mut()
            .find(|s| s.id == scene_id)
            .ok_or(CoreError::NotFound {
                entity: "scene",
                id: scene_id,
            })?;
        apply(scene)?;
        self.store.save_scene(scene).await?;
        let updated = scene.clone();

        self.refresh_progress(&mut job, &scenes).await?;
        tracing::debug!(job_id, scene_id, status = updated.status.as_str(), "Scene updated");
        Ok(updated)
    }
}

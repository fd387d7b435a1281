//! Background stages of a started job: render fan-in, stitch, audio.
//!
//! Long-running work (provider calls, subprocesses) never runs under the
//! job lock. Each stage takes the lock only to read the aggregate and to
//! record what happened. Only the stitch plan needs clip bytes; every
//! other read goes through `load_scene_states`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use storyreel_core::error::CoreError;
use storyreel_core::job::{Job, JobStatus, ProcessingStage};
use storyreel_core::scene::{Scene, SceneSpec, SceneStatus};
use storyreel_core::types::DbId;
use storyreel_events::PipelineEvent;
use storyreel_pipeline::{RenderOutcome, SettleSink, StitchPlan};

use crate::coordinator::Inner;
use crate::error::CoordinatorError;

const STITCHING: JobStatus = JobStatus::Processing(ProcessingStage::Stitching);
const AUDIO_PENDING: JobStatus = JobStatus::Processing(ProcessingStage::AudioPending);
const AUDIO_GENERATION: JobStatus = JobStatus::Processing(ProcessingStage::AudioGeneration);

/// Records each render outcome against its scene as soon as it settles.
struct JobSink {
    inner: Arc<Inner>,
    job_id: DbId,
}

#[async_trait]
impl SettleSink for JobSink {
    async fn settled(&self, scene_id: DbId, outcome: RenderOutcome) {
        if let Err(e) = self.inner.record_outcome(self.job_id, scene_id, outcome).await {
            tracing::error!(job_id = self.job_id, scene_id, error = %e, "Failed to record render outcome");
        }
    }
}

/// `completed`, or `completed_partial` when the stitch skipped scenes.
fn finished_status(job: &Job) -> JobStatus {
    if job.progress.skipped_scenes.is_empty() {
        JobStatus::Completed
    } else {
        JobStatus::CompletedPartial
    }
}

impl Inner {
    /// Render every dispatched scene, then carry the job through stitching.
    pub(crate) async fn drive(self: Arc<Self>, job_id: DbId, batch: Vec<(DbId, SceneSpec)>) {
        let sink = JobSink {
            inner: Arc::clone(&self),
            job_id,
        };
        let summary = self.dispatcher.render_all(batch, &sink).await;
        tracing::info!(
            job_id,
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            "All renders settled"
        );

        match self.stitch_stage(job_id).await {
            Ok(true) => {
                let inner = Arc::clone(&self);
                self.tasks.spawn(inner.audio_stage(job_id));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id, error = %e, "Stitch stage aborted");
                self.abort(job_id, format!("internal error: {e}")).await;
            }
        }
    }

    async fn record_outcome(
        &self,
        job_id: DbId,
        scene_id: DbId,
        outcome: RenderOutcome,
    ) -> Result<(), CoordinatorError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.store.load_job(job_id).await?;
        let mut scenes = self.store.load_scene_states(job_id).await?;
        let scene = scenes
            .iter_mut()
            .find(|s| s.id == scene_id)
            .ok_or(CoreError::NotFound {
                entity: "scene",
                id: scene_id,
            })?;

        match outcome {
            RenderOutcome::Completed { handle, clip } => scene.complete(Some(handle), clip)?,
            RenderOutcome::Failed { handle, error } => scene.fail(handle, error.to_string())?,
        }
        self.store.save_scene(scene).await?;
        let event = PipelineEvent::scene_settled(job_id, scene_id, scene.status, scene.error_message.as_deref());

        self.refresh_progress(&mut job, &scenes).await?;
        self.events.publish(event);
        Ok(())
    }

    /// Decide full, partial or no stitch and run it. Returns whether the
    /// audio stage should follow.
    async fn stitch_stage(&self, job_id: DbId) -> Result<bool, CoordinatorError> {
        let plan = {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;

            let mut job = self.store.load_job(job_id).await?;
            let scenes = self.store.load_scenes(job_id).await?;
            let plan = StitchPlan::from_scenes(&scenes);

            if plan.clips.len() < self.min_success_scenes {
                let message = if plan.clips.is_empty() {
                    "all renders failed".to_string()
                } else {
                    format!(
                        "only {} of {} scenes rendered, {} required",
                        plan.clips.len(),
                        scenes.len(),
                        self.min_success_scenes
                    )
                };
                self.fail(&mut job, &scenes, message).await?;
                return Ok(false);
            }

            if plan.is_partial() {
                tracing::warn!(job_id, skipped = ?plan.skipped, "Stitching partial result");
            }
            job.progress.skipped_scenes = plan.skipped.clone();
            self.advance(&mut job, &scenes, STITCHING).await?;
            plan
        };

        let stitched = self.stitcher.stitch(plan).await;

        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;
        let mut job = self.store.load_job(job_id).await?;
        let scenes = self.store.load_scene_states(job_id).await?;

        let output = match stitched {
            Ok(output) => output,
            Err(e) => {
                self.fail(&mut job, &scenes, e.to_string()).await?;
                return Ok(false);
            }
        };
        tracing::info!(
            job_id,
            clips = output.clip_count,
            skipped = output.skipped_scenes.len(),
            "Stitched result stored"
        );
        job.set_result(output.video)?;
        self.store.save_outputs(&job).await?;

        if self.audio.settings().enabled {
            self.advance(&mut job, &scenes, AUDIO_PENDING).await?;
            Ok(true)
        } else {
            let done = finished_status(&job);
            self.advance(&mut job, &scenes, done).await?;
            Ok(false)
        }
    }

    async fn audio_stage(self: Arc<Self>, job_id: DbId) {
        if let Err(e) = self.run_audio(job_id).await {
            tracing::error!(job_id, error = %e, "Audio stage aborted");
            self.abort(job_id, format!("internal error: {e}")).await;
        }
    }

    async fn run_audio(&self, job_id: DbId) -> Result<(), CoordinatorError> {
        let settings = self.audio.settings().clone();

        let (video, specs, silent, strategy) = {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;

            let mut job = self.store.load_job(job_id).await?;
            let scenes = self.store.load_scene_states(job_id).await?;
            self.advance(&mut job, &scenes, AUDIO_GENERATION).await?;

            let silent: Vec<usize> = scenes
                .iter()
                .enumerate()
                .filter(|(_, s)| s.status != SceneStatus::Completed)
                .map(|(index, _)| index)
                .collect();
            let specs: Vec<SceneSpec> = scenes.iter().map(|s| s.spec.clone()).collect();
            let strategy = job.audio_error_strategy.unwrap_or(settings.error_strategy);
            (job.result.clone(), specs, silent, strategy)
        };

        let composed = self.audio.compose(&specs, &silent, strategy).await;
        let muxed: Option<Result<Bytes, _>> = match (&composed, &video) {
            (Ok(track), Some(video)) if settings.merge_into_video => {
                Some(self.audio.mux(video, &track.audio, settings.sync_mode).await)
            }
            _ => None,
        };

        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;
        let mut job = self.store.load_job(job_id).await?;
        let scenes = self.store.load_scene_states(job_id).await?;

        let mut ready = None;
        match composed {
            Ok(track) => {
                tracing::info!(
                    job_id,
                    duration_secs = track.duration_secs,
                    silent_scenes = ?track.silent_scenes,
                    "Soundtrack composed"
                );
                let audio_bytes = track.audio.len();
                job.audio_track = Some(track.audio);
                let merged = match muxed {
                    Some(Ok(video)) => {
                        job.muxed_result = Some(video);
                        true
                    }
                    Some(Err(e)) => {
                        tracing::error!(job_id, error = %e, "Soundtrack mux failed");
                        job.progress.error_message = Some(format!("audio mux failed: {e}"));
                        false
                    }
                    None => false,
                };
                ready = Some(PipelineEvent::audio_ready(job_id, audio_bytes, merged));
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Soundtrack generation failed");
                job.progress.error_message = Some(format!("audio generation failed: {e}"));
            }
        }

        if job.audio_track.is_some() {
            self.store.save_outputs(&job).await?;
        }
        let done = finished_status(&job);
        self.advance(&mut job, &scenes, done).await?;
        if let Some(event) = ready {
            self.events.publish(event);
        }
        Ok(())
    }

    async fn fail(&self, job: &mut Job, scenes: &[Scene], message: String) -> Result<(), CoordinatorError> {
        tracing::error!(job_id = job.id, error = %message, "Job failed");
        job.progress.error_message = Some(message);
        self.advance(job, scenes, JobStatus::Failed).await
    }

    /// Best-effort move to `failed` after an unexpected error, so the job
    /// never stays stuck in a processing stage.
    async fn abort(&self, job_id: DbId, message: String) {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let result: Result<(), CoordinatorError> = async {
            let mut job = self.store.load_job(job_id).await?;
            if !job.status.is_processing() {
                return Ok(());
            }
            let scenes = self.store.load_scene_states(job_id).await?;
            self.fail(&mut job, &scenes, message).await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(job_id, error = %e, "Failed to mark job as failed");
        }
    }
}

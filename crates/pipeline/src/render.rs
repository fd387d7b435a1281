//! Render dispatch: one remote render per scene, all scenes concurrently,
//! joined with a wait-for-all-settled barrier.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use storyreel_core::render::{RenderModel, RenderRequest};
use storyreel_core::scene::SceneSpec;
use storyreel_core::types::DbId;
use storyreel_providers::poll::{poll_until_settled, retry_transient, PollConfig};
use storyreel_providers::RenderProvider;

use crate::error::PipelineError;

/// How one scene's render settled.
#[derive(Debug)]
pub enum RenderOutcome {
    Completed {
        handle: String,
        clip: Bytes,
    },
    Failed {
        /// Absent when the request failed before submission.
        handle: Option<String>,
        error: PipelineError,
    },
}

impl RenderOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Receives each scene's outcome as soon as it settles.
#[async_trait]
pub trait SettleSink: Send + Sync {
    async fn settled(&self, scene_id: DbId, outcome: RenderOutcome);
}

/// Scene ids grouped by render outcome, in dispatch order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenderSummary {
    pub completed: Vec<DbId>,
    pub failed: Vec<DbId>,
}

pub struct RenderDispatcher {
    provider: Arc<dyn RenderProvider>,
    poll: PollConfig,
    default_model: RenderModel,
}

impl RenderDispatcher {
    pub fn new(provider: Arc<dyn RenderProvider>, poll: PollConfig, default_model: RenderModel) -> Self {
        Self {
            provider,
            poll,
            default_model,
        }
    }

    pub fn default_model(&self) -> RenderModel {
        self.default_model
    }

    /// Render a single scene: build the request, submit, poll, download.
    pub async fn render(&self, spec: &SceneSpec) -> RenderOutcome {
        let request = match RenderRequest::build(spec, self.default_model) {
            Ok(request) => request,
            Err(e) => {
                return RenderOutcome::Failed {
                    handle: None,
                    error: e.into(),
                }
            }
        };

        let provider = self.provider.as_ref();
        let request = &request;
        let submitted = retry_transient("render submission", &self.poll, move || async move {
            provider.submit(request).await
        })
        .await;
        let handle = match submitted {
            Ok(handle) => handle,
            Err(e) => {
                return RenderOutcome::Failed {
                    handle: None,
                    error: e.into(),
                }
            }
        };

        match self.settle(&handle).await {
            Ok(clip) => RenderOutcome::Completed { handle, clip },
            Err(error) => RenderOutcome::Failed {
                handle: Some(handle),
                error,
            },
        }
    }

    async fn settle(&self, handle: &str) -> Result<Bytes, PipelineError> {
        let provider = Arc::clone(&self.provider);
        let job = poll_until_settled(handle, &self.poll, move || {
            let provider = Arc::clone(&provider);
            let handle = handle.to_string();
            async move { provider.poll(&handle).await }
        })
        .await?;

        let url = job.output_url.ok_or_else(|| {
            PipelineError::ProviderJobFailed(format!("render {handle} succeeded without output"))
        })?;
        let provider = self.provider.as_ref();
        let url = url.as_str();
        let clip = retry_transient(handle, &self.poll, move || async move {
            provider.download(url).await
        })
        .await?;
        Ok(clip)
    }

    /// Render every scene concurrently and wait until all have settled.
    ///
    /// Each outcome is handed to `sink` as soon as its scene settles; one
    /// slow or failing scene never holds back the others.
    pub async fn render_all<S: SettleSink>(
        &self,
        scenes: Vec<(DbId, SceneSpec)>,
        sink: &S,
    ) -> RenderSummary {
        let settled = join_all(scenes.into_iter().map(|(scene_id, spec)| async move {
            let outcome = self.render(&spec).await;
            let completed = outcome.is_completed();
            match &outcome {
                RenderOutcome::Completed { handle, .. } => {
                    tracing::info!(scene_id, handle = %handle, "Scene render completed");
                }
                RenderOutcome::Failed { handle, error } => {
                    tracing::warn!(scene_id, handle = ?handle, error = %error, "Scene render failed");
                }
            }
            sink.settled(scene_id, outcome).await;
            (scene_id, completed)
        }))
        .await;

        let mut summary = RenderSummary::default();
        for (scene_id, completed) in settled {
            if completed {
                summary.completed.push(scene_id);
            } else {
                summary.failed.push(scene_id);
            }
        }
        summary
    }
}

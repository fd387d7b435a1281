//! Event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>`; the coordinator publishes a
//! [`PipelineEvent`] for every job status change and scene settlement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyreel_core::job::JobStatus;
use storyreel_core::scene::SceneStatus;
use storyreel_core::types::DbId;
use tokio::sync::broadcast;

pub const EVENT_JOB_STATUS_CHANGED: &str = "job.status_changed";
pub const EVENT_SCENE_SETTLED: &str = "scene.settled";
pub const EVENT_JOB_AUDIO_READY: &str = "job.audio_ready";

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Something that happened to a job while it moved through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dot-separated event name, e.g. `"scene.settled"`.
    pub event_type: String,
    pub job_id: DbId,
    pub scene_id: Option<DbId>,
    /// Event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(event_type: impl Into<String>, job_id: DbId) -> Self {
        Self {
            event_type: event_type.into(),
            job_id,
            scene_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_scene(mut self, scene_id: DbId) -> Self {
        self.scene_id = Some(scene_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn status_changed(job_id: DbId, from: JobStatus, to: JobStatus) -> Self {
        Self::new(EVENT_JOB_STATUS_CHANGED, job_id).with_payload(serde_json::json!({
            "from": from.as_str(),
            "to": to.as_str(),
        }))
    }

    pub fn scene_settled(
        job_id: DbId,
        scene_id: DbId,
        status: SceneStatus,
        error: Option<&str>,
    ) -> Self {
        Self::new(EVENT_SCENE_SETTLED, job_id)
            .with_scene(scene_id)
            .with_payload(serde_json::json!({
                "status": status.as_str(),
                "error": error,
            }))
    }

    pub fn audio_ready(job_id: DbId, audio_bytes: usize, muxed: bool) -> Self {
        Self::new(EVENT_JOB_AUDIO_READY, job_id).with_payload(serde_json::json!({
            "audio_bytes": audio_bytes,
            "muxed": muxed,
        }))
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Events buffered per subscriber before the slowest one starts lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out hub for [`PipelineEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    /// Deliver `event` to every live subscriber. Returns how many received
    /// it; zero is not an error.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        let delivered = self.sender.send(event).unwrap_or(0);
        tracing::trace!(delivered, "Pipeline event published");
        delivered
    }

    /// Every event from now on, for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Events from now on for `job_id` only.
    pub fn subscribe_job(&self, job_id: DbId) -> JobEvents {
        JobEvents {
            job_id,
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

/// A subscription narrowed to a single job.
pub struct JobEvents {
    job_id: DbId,
    receiver: broadcast::Receiver<PipelineEvent>,
}

impl JobEvents {
    /// Next event for the job, or `None` once the bus is gone. Events lost
    /// to lag are skipped with a warning.
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.job_id == self.job_id => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(job_id = self.job_id, skipped, "Job subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Status the job moves to on its next `job.status_changed` event.
    pub async fn next_status(&mut self) -> Option<JobStatus> {
        while let Some(event) = self.next().await {
            if event.event_type != EVENT_JOB_STATUS_CHANGED {
                continue;
            }
            if let Some(to) = event.payload["to"].as_str() {
                return JobStatus::parse(to).ok();
            }
        }
        None
    }
}

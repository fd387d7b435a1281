//! Job lifecycle state machine.
//!
//! Status only advances forward through
//! `pending -> approved -> processing(rendering|stitching|audio_pending|audio_generation)
//! -> completed|completed_partial`, except that any processing sub-stage may
//! fall into `failed`.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::audio::AudioErrorStrategy;
use crate::error::CoreError;
use crate::progress::ProgressSnapshot;
use crate::scene::SceneSpec;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Status labels (persisted as text)
// ---------------------------------------------------------------------------

pub const JOB_STATUS_PENDING: &str = "pending";
pub const JOB_STATUS_APPROVED: &str = "approved";
pub const JOB_STATUS_RENDERING: &str = "rendering";
pub const JOB_STATUS_STITCHING: &str = "stitching";
pub const JOB_STATUS_AUDIO_PENDING: &str = "audio_pending";
pub const JOB_STATUS_AUDIO_GENERATION: &str = "audio_generation";
pub const JOB_STATUS_COMPLETED: &str = "completed";
pub const JOB_STATUS_COMPLETED_PARTIAL: &str = "completed_partial";
pub const JOB_STATUS_FAILED: &str = "failed";

/// Sub-stage of an actively processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStage {
    Rendering,
    Stitching,
    AudioPending,
    AudioGeneration,
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Approved,
    Processing(ProcessingStage),
    Completed,
    CompletedPartial,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => JOB_STATUS_PENDING,
            Self::Approved => JOB_STATUS_APPROVED,
            Self::Processing(ProcessingStage::Rendering) => JOB_STATUS_RENDERING,
            Self::Processing(ProcessingStage::Stitching) => JOB_STATUS_STITCHING,
            Self::Processing(ProcessingStage::AudioPending) => JOB_STATUS_AUDIO_PENDING,
            Self::Processing(ProcessingStage::AudioGeneration) => JOB_STATUS_AUDIO_GENERATION,
            Self::Completed => JOB_STATUS_COMPLETED,
            Self::CompletedPartial => JOB_STATUS_COMPLETED_PARTIAL,
            Self::Failed => JOB_STATUS_FAILED,
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Ok(match s {
            JOB_STATUS_PENDING => Self::Pending,
            JOB_STATUS_APPROVED => Self::Approved,
            JOB_STATUS_RENDERING => Self::Processing(ProcessingStage::Rendering),
            JOB_STATUS_STITCHING => Self::Processing(ProcessingStage::Stitching),
            JOB_STATUS_AUDIO_PENDING => Self::Processing(ProcessingStage::AudioPending),
            JOB_STATUS_AUDIO_GENERATION => Self::Processing(ProcessingStage::AudioGeneration),
            JOB_STATUS_COMPLETED => Self::Completed,
            JOB_STATUS_COMPLETED_PARTIAL => Self::CompletedPartial,
            JOB_STATUS_FAILED => Self::Failed,
            other => {
                return Err(CoreError::Validation(format!(
                    "Unknown job status '{other}'"
                )))
            }
        })
    }

    pub fn is_processing(self) -> bool {
        matches!(self, Self::Processing(_))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::CompletedPartial | Self::Failed)
    }

    /// Position in the forward ordering. `Failed` sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Approved => Some(1),
            Self::Processing(ProcessingStage::Rendering) => Some(2),
            Self::Processing(ProcessingStage::Stitching) => Some(3),
            Self::Processing(ProcessingStage::AudioPending) => Some(4),
            Self::Processing(ProcessingStage::AudioGeneration) => Some(5),
            Self::Completed | Self::CompletedPartial => Some(6),
            Self::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle ordering.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (current, Self::Failed) => current.is_processing(),
            (Self::Pending, next) => next == Self::Approved,
            (Self::Approved, next) => next == Self::Processing(ProcessingStage::Rendering),
            (current, next) => match (current.rank(), next.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        JobStatus::parse(&label).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Job aggregate
// ---------------------------------------------------------------------------

/// One video-generation request.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: DbId,
    pub status: JobStatus,
    pub storyboard: Vec<SceneSpec>,
    pub progress: ProgressSnapshot,
    /// Stitched video. Set exactly once, on the stitch step.
    #[serde(skip_serializing)]
    pub result: Option<Bytes>,
    /// Generated soundtrack, when the audio stage ran.
    #[serde(skip_serializing)]
    pub audio_track: Option<Bytes>,
    /// Stitched video with the soundtrack muxed in.
    #[serde(skip_serializing)]
    pub muxed_result: Option<Bytes>,
    /// Per-job override of the deployment audio error strategy.
    pub audio_error_strategy: Option<AudioErrorStrategy>,
    /// Estimated render cost in provider currency units.
    pub cost_estimate: Option<f64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Move the job to `next`, enforcing the lifecycle ordering.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Validation(format!(
                "Job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Store the stitched video. Fails if a result was already recorded.
    pub fn set_result(&mut self, video: Bytes) -> Result<(), CoreError> {
        if self.result.is_some() {
            return Err(CoreError::Conflict(format!(
                "Job {} already has a stitched result",
                self.id
            )));
        }
        self.result = Some(video);
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Reject scene mutations while a processing sub-stage is active.
    pub fn ensure_idle(&self) -> Result<(), CoreError> {
        if self.status.is_processing() {
            return Err(CoreError::Validation(format!(
                "Job {} is {} and cannot be modified until it finishes",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

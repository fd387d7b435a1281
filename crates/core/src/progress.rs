//! Job progress snapshot: per-status scene counts, percentage, and the
//! stage inferred from the job status.

use serde::{Deserialize, Serialize};

use crate::job::{JobStatus, ProcessingStage};
use crate::scene::{Scene, SceneStatus};
use crate::types::DbId;

/// Share of the percentage bar covered by the rendering stage.
pub const RENDER_PROGRESS_WEIGHT: u32 = 70;
pub const STITCHING_PROGRESS: u8 = 75;
pub const AUDIO_PENDING_PROGRESS: u8 = 80;
pub const AUDIO_GENERATION_PROGRESS: u8 = 85;

/// Scene counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCounts {
    pub total: u32,
    pub pending: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
}

impl SceneCounts {
    pub fn tally<'a>(scenes: impl IntoIterator<Item = &'a Scene>) -> Self {
        let mut counts = Self::default();
        for scene in scenes {
            counts.total += 1;
            match scene.status {
                SceneStatus::Pending => counts.pending += 1,
                SceneStatus::Processing => counts.processing += 1,
                SceneStatus::Completed => counts.completed += 1,
                SceneStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn settled(&self) -> u32 {
        self.completed + self.failed
    }
}

/// Persisted, pollable view of a job's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub percentage: u8,
    pub scenes: SceneCounts,
    pub error_message: Option<String>,
    /// Scenes left out of a partial stitch.
    #[serde(default)]
    pub skipped_scenes: Vec<DbId>,
}

impl ProgressSnapshot {
    /// Recompute counts, percentage and stage from the current status and
    /// scenes. The error message and skipped-scene list carry over from
    /// `previous`.
    pub fn recompute(status: JobStatus, scenes: &[Scene], previous: &ProgressSnapshot) -> Self {
        let counts = SceneCounts::tally(scenes);
        Self {
            stage: status.as_str().to_string(),
            percentage: percentage_for(status, &counts),
            scenes: counts,
            error_message: previous.error_message.clone(),
            skipped_scenes: previous.skipped_scenes.clone(),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

fn render_percentage(counts: &SceneCounts) -> u8 {
    if counts.total == 0 {
        return 0;
    }
    (counts.settled() * RENDER_PROGRESS_WEIGHT / counts.total) as u8
}

fn percentage_for(status: JobStatus, counts: &SceneCounts) -> u8 {
    match status {
        JobStatus::Pending | JobStatus::Approved => 0,
        JobStatus::Processing(ProcessingStage::Rendering) | JobStatus::Failed => {
            render_percentage(counts)
        }
        JobStatus::Processing(ProcessingStage::Stitching) => STITCHING_PROGRESS,
        JobStatus::Processing(ProcessingStage::AudioPending) => AUDIO_PENDING_PROGRESS,
        JobStatus::Processing(ProcessingStage::AudioGeneration) => AUDIO_GENERATION_PROGRESS,
        JobStatus::Completed | JobStatus::CompletedPartial => 100,
    }
}

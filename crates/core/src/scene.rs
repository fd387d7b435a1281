//! Scenes: the render units of a job's storyboard.
//!
//! A [`SceneSpec`] is the upstream storyboard entry; a [`Scene`] is the
//! persisted render unit built from it, carrying its own status, provider
//! handle and rendered clip.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Scene status
// ---------------------------------------------------------------------------

pub const SCENE_STATUS_PENDING: &str = "pending";
pub const SCENE_STATUS_PROCESSING: &str = "processing";
pub const SCENE_STATUS_COMPLETED: &str = "completed";
pub const SCENE_STATUS_FAILED: &str = "failed";

/// Render status of a single scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SceneStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => SCENE_STATUS_PENDING,
            Self::Processing => SCENE_STATUS_PROCESSING,
            Self::Completed => SCENE_STATUS_COMPLETED,
            Self::Failed => SCENE_STATUS_FAILED,
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            SCENE_STATUS_PENDING => Ok(Self::Pending),
            SCENE_STATUS_PROCESSING => Ok(Self::Processing),
            SCENE_STATUS_COMPLETED => Ok(Self::Completed),
            SCENE_STATUS_FAILED => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown scene status '{other}'"
            ))),
        }
    }

    /// A settled scene has reached a terminal render outcome.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal forward transitions: `pending -> processing -> {completed|failed}`.
    ///
    /// The reverse move back to `pending` is only reachable through
    /// [`Scene::regenerate`].
    pub fn can_transition_to(self, next: SceneStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

// ---------------------------------------------------------------------------
// Storyboard entry
// ---------------------------------------------------------------------------

/// Music descriptors attached to a storyboard entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicDescriptors {
    pub style: Option<String>,
    pub mood: Option<String>,
    pub tempo_bpm: Option<u32>,
    #[serde(default)]
    pub instruments: Vec<String>,
}

/// One entry of the approved storyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSpec {
    pub prompt: String,
    /// Target duration in seconds.
    pub duration_secs: f64,
    /// Transition into the next scene (informational; clips are cut-joined).
    pub transition: Option<String>,
    #[serde(default)]
    pub music: MusicDescriptors,
    pub first_frame_url: Option<String>,
    pub last_frame_url: Option<String>,
    /// Render model key; the deployment default applies when absent.
    pub render_model: Option<String>,
    pub aspect_ratio: Option<String>,
}

impl SceneSpec {
    /// Build the style/mood prompt sent to the music provider for this scene.
    pub fn music_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(style) = &self.music.style {
            parts.push(style.clone());
        }
        if let Some(mood) = &self.music.mood {
            parts.push(format!("{mood} mood"));
        }
        if let Some(bpm) = self.music.tempo_bpm {
            parts.push(format!("{bpm} bpm"));
        }
        if !self.music.instruments.is_empty() {
            parts.push(format!("featuring {}", self.music.instruments.join(", ")));
        }
        if parts.is_empty() {
            parts.push("instrumental background score".to_string());
        }
        format!("{}. Scene: {}", parts.join(", "), self.prompt)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation(
                "Scene prompt must not be empty".to_string(),
            ));
        }
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Scene duration must be > 0, got {}",
                self.duration_secs
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scene (render unit)
// ---------------------------------------------------------------------------

/// A persisted render unit belonging to exactly one job.
#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    pub id: DbId,
    pub job_id: DbId,
    /// Zero-based position in the storyboard.
    pub position: i32,
    pub spec: SceneSpec,
    pub status: SceneStatus,
    /// Opaque handle returned by the render provider on submission.
    pub provider_handle: Option<String>,
    /// Rendered clip, present only once completed.
    #[serde(skip_serializing)]
    pub clip: Option<Bytes>,
    pub error_message: Option<String>,
    pub updated_at: Timestamp,
}

impl Scene {
    /// Apply an externally requested status change.
    pub fn apply_status(&mut self, next: SceneStatus) -> Result<(), CoreError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Validation(format!(
                "Scene {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Mark the scene as submitted to the render provider.
    pub fn mark_processing(&mut self) -> Result<(), CoreError> {
        self.apply_status(SceneStatus::Processing)?;
        self.error_message = None;
        Ok(())
    }

    /// Record a successful render.
    pub fn complete(&mut self, handle: Option<String>, clip: Bytes) -> Result<(), CoreError> {
        self.apply_status(SceneStatus::Completed)?;
        if handle.is_some() {
            self.provider_handle = handle;
        }
        self.clip = Some(clip);
        Ok(())
    }

    /// Record a failed render.
    pub fn fail(&mut self, handle: Option<String>, message: impl Into<String>) -> Result<(), CoreError> {
        self.apply_status(SceneStatus::Failed)?;
        if handle.is_some() {
            self.provider_handle = handle;
        }
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Force a settled scene back to `pending`, clearing the provider handle
    /// and any rendered clip.
    pub fn regenerate(&mut self) -> Result<(), CoreError> {
        match self.status {
            SceneStatus::Completed | SceneStatus::Failed | SceneStatus::Pending => {
                self.status = SceneStatus::Pending;
                self.provider_handle = None;
                self.clip = None;
                self.error_message = None;
                self.touch();
                Ok(())
            }
            SceneStatus::Processing => Err(CoreError::Validation(format!(
                "Scene {} is still processing and cannot be regenerated",
                self.id
            ))),
        }
    }

    /// Completed with a clip in hand. Anything else still needs a render.
    pub fn is_rendered(&self) -> bool {
        self.status == SceneStatus::Completed && self.clip.is_some()
    }

    /// Put the scene back in the render queue whatever its status. Only
    /// valid while no render of it is in flight.
    pub fn requeue(&mut self) {
        self.status = SceneStatus::Pending;
        self.provider_handle = None;
        self.clip = None;
        self.error_message = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

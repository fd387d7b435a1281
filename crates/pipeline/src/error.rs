use storyreel_core::error::CoreError;
use storyreel_core::ffmpeg::ProbeError;
use storyreel_providers::ProviderError;

use crate::cache::CacheMiss;

/// Failures of the render, stitch, audio and cache stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Transport failure or unusable response from a provider.
    #[error("Provider request failed: {0}")]
    ProviderRequest(ProviderError),

    /// The remote job reached a terminal failure or was canceled.
    #[error("{0}")]
    ProviderJobFailed(String),

    #[error("{0}")]
    PollTimeout(String),

    #[error("Media tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Media tool failed (exit code {exit_code:?}): {stderr}")]
    ToolExecution {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Insufficient scratch space: need {required_bytes} bytes, {available_bytes} available")]
    InsufficientResource {
        required_bytes: u64,
        available_bytes: u64,
    },

    #[error("Artifact cache miss: {0}")]
    CacheMiss(#[from] CacheMiss),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The `halt` strategy stopped the audio chain at this scene.
    #[error("Audio generation halted at scene {scene_index}: {source}")]
    AudioHalted {
        scene_index: usize,
        source: Box<PipelineError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProviderError> for PipelineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::JobFailed { .. } | ProviderError::Canceled { .. } => {
                PipelineError::ProviderJobFailed(err.to_string())
            }
            ProviderError::PollTimeout { .. } => PipelineError::PollTimeout(err.to_string()),
            other => PipelineError::ProviderRequest(other),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => PipelineError::Validation(msg),
            other => PipelineError::Validation(other.to_string()),
        }
    }
}

impl From<ProbeError> for PipelineError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Spawn { bin, source } if source.kind() == std::io::ErrorKind::NotFound => {
                PipelineError::ToolUnavailable(format!("{bin}: {source}"))
            }
            ProbeError::Spawn { source, .. } => PipelineError::Io(source),
            ProbeError::Failed { exit_code, stderr } => {
                PipelineError::ToolExecution { exit_code, stderr }
            }
            other => PipelineError::ToolExecution {
                exit_code: None,
                stderr: other.to_string(),
            },
        }
    }
}

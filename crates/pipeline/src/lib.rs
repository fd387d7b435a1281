//! Render dispatch, media stitching, audio continuation and the ephemeral
//! artifact cache.
//!
//! Everything here runs outside the coordinator's per-job critical
//! sections: the coordinator hands work to these components and only
//! records their outcomes.

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod media;
pub mod render;
pub mod stitch;

#[cfg(any(test, feature = "test-support"))]
pub mod fakes;

pub use audio::{AudioPipeline, ComposedTrack};
pub use cache::{ArtifactCache, CacheMiss};
pub use config::{AudioSettings, PipelineConfig};
pub use error::PipelineError;
pub use media::{FfmpegTool, MediaTool, MuxPlan};
pub use render::{RenderDispatcher, RenderOutcome, RenderSummary, SettleSink};
pub use stitch::{StitchAssembler, StitchOutput, StitchPlan};

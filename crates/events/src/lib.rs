//! In-process pipeline event stream.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`JobEvents`]: a subscription narrowed to one job.
//! - [`PipelineEvent`]: the event envelope emitted by the coordinator.
//! - [`EventLogger`]: background subscriber that traces every event.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, JobEvents, PipelineEvent};
pub use logger::EventLogger;

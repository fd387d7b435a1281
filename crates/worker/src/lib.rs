//! The workflow coordinator.
//!
//! [`Coordinator`] owns every job lifecycle transition after approval. All
//! mutations of one job run one at a time behind a per-job lock; render
//! fan-out, stitching and audio run as background tasks that re-enter the
//! lock only to record their outcomes.

pub mod coordinator;
pub mod error;
mod stages;
pub mod wiring;

pub use coordinator::Coordinator;
pub use error::CoordinatorError;
pub use wiring::from_config;

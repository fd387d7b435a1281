//! Clients for the external generation providers.
//!
//! - [`api::ReplicateApi`]: REST wrapper for prediction-style providers.
//! - [`poll`]: bounded exponential-backoff polling of remote jobs.
//! - [`render::RenderProvider`] / [`music::MusicProvider`]: the seams the
//!   pipeline depends on, with Replicate-backed implementations.

pub mod api;
pub mod config;
pub mod error;
pub mod music;
pub mod poll;
pub mod render;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use music::{ComposeRequest, ComposedAudio, Continuation, Coverage, MusicProvider};
pub use poll::{PollConfig, RemoteJob, RemoteStatus};
pub use render::RenderProvider;

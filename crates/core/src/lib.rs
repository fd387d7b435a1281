//! Domain types for the storyboard-to-video pipeline.
//!
//! Everything in this crate is free of network and database I/O: job and
//! scene state machines, progress bookkeeping, render request
//! normalization, audio policy math, and ffprobe output parsing.

pub mod audio;
pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod progress;
pub mod render;
pub mod scene;
pub mod types;

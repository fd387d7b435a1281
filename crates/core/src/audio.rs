//! Audio stage policy: failure strategy, video/audio sync modes, and the
//! duration math behind continuation windows and tempo reconciliation.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Failure strategy
// ---------------------------------------------------------------------------

pub const STRATEGY_CONTINUE_WITH_SILENCE: &str = "continue_with_silence";
pub const STRATEGY_HALT: &str = "halt";

/// What the continuation chain does when one scene's segment fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioErrorStrategy {
    /// Substitute silence of the scene's target duration and keep going.
    #[default]
    ContinueWithSilence,
    /// Abort the whole audio stage.
    Halt,
}

impl AudioErrorStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContinueWithSilence => STRATEGY_CONTINUE_WITH_SILENCE,
            Self::Halt => STRATEGY_HALT,
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            STRATEGY_CONTINUE_WITH_SILENCE => Ok(Self::ContinueWithSilence),
            STRATEGY_HALT => Ok(Self::Halt),
            other => Err(CoreError::Validation(format!(
                "Unknown audio error strategy '{other}'. Valid: {STRATEGY_CONTINUE_WITH_SILENCE}, {STRATEGY_HALT}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync mode
// ---------------------------------------------------------------------------

pub const SYNC_TRIM: &str = "trim";
pub const SYNC_STRETCH: &str = "stretch";
pub const SYNC_TEMPO: &str = "tempo";

/// How the soundtrack's duration is reconciled with the video's when muxing.
/// The video length itself is never altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Cut (or pad) the audio to the video length.
    #[default]
    Trim,
    /// Uniformly time-stretch the audio to the video length.
    Stretch,
    /// Tempo adjustment clamped to [`MIN_TEMPO`]..=[`MAX_TEMPO`], then trim/pad.
    Tempo,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trim => SYNC_TRIM,
            Self::Stretch => SYNC_STRETCH,
            Self::Tempo => SYNC_TEMPO,
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            SYNC_TRIM => Ok(Self::Trim),
            SYNC_STRETCH => Ok(Self::Stretch),
            SYNC_TEMPO => Ok(Self::Tempo),
            other => Err(CoreError::Validation(format!(
                "Unknown sync mode '{other}'. Valid: {SYNC_TRIM}, {SYNC_STRETCH}, {SYNC_TEMPO}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Duration math
// ---------------------------------------------------------------------------

pub const MIN_TEMPO: f64 = 0.5;
pub const MAX_TEMPO: f64 = 2.0;

/// Trailing window `(start, end)` in seconds of the cumulative track that a
/// continuation call should extend from. Never reaches before zero.
pub fn continuation_window(cumulative_secs: f64, window_secs: f64) -> (f64, f64) {
    let end = cumulative_secs.max(0.0);
    let start = (end - window_secs.max(0.0)).max(0.0);
    (start, end)
}

/// Playback-rate factor that maps `audio_secs` onto `video_secs`.
///
/// A factor above 1.0 speeds the audio up. Degenerate inputs yield 1.0.
pub fn tempo_factor(audio_secs: f64, video_secs: f64) -> f64 {
    if audio_secs <= 0.0 || video_secs <= 0.0 {
        return 1.0;
    }
    audio_secs / video_secs
}

/// [`tempo_factor`] clamped to the bounded-tempo range.
pub fn bounded_tempo_factor(audio_secs: f64, video_secs: f64) -> f64 {
    tempo_factor(audio_secs, video_secs).clamp(MIN_TEMPO, MAX_TEMPO)
}

/// Build an ffmpeg `atempo` filter chain for an arbitrary factor.
///
/// A single `atempo` stage only accepts 0.5..=2.0, so larger changes are
/// split into several stages whose product equals `factor`.
pub fn atempo_chain(factor: f64) -> String {
    let mut remaining = if factor.is_finite() && factor > 0.0 { factor } else { 1.0 };
    let mut stages = Vec::new();
    while remaining > MAX_TEMPO {
        stages.push(MAX_TEMPO);
        remaining /= MAX_TEMPO;
    }
    while remaining < MIN_TEMPO {
        stages.push(MIN_TEMPO);
        remaining /= MIN_TEMPO;
    }
    stages.push(remaining);
    stages
        .iter()
        .map(|s| format!("atempo={s:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

use std::path::PathBuf;
use std::time::Duration;

use storyreel_core::audio::{AudioErrorStrategy, SyncMode};

/// Audio stage behaviour.
#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub enabled: bool,
    /// Mux the finished track into the stitched video.
    pub merge_into_video: bool,
    pub sync_mode: SyncMode,
    /// Deployment default; a job may override it.
    pub error_strategy: AudioErrorStrategy,
    /// Trailing window of cumulative audio handed to each continuation call.
    pub continuation_window_secs: f64,
    /// Crossfade used when appending an increment to the running track.
    pub crossfade_secs: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            merge_into_video: true,
            sync_mode: SyncMode::Trim,
            error_strategy: AudioErrorStrategy::ContinueWithSilence,
            continuation_window_secs: 1.0,
            crossfade_secs: 0.1,
        }
    }
}

/// Configuration shared by the pipeline components.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub audio: AudioSettings,
    pub cache_ttl: Duration,
    pub cache_sweep_interval: Duration,
    /// Root under which per-invocation scratch directories are created.
    pub scratch_dir: PathBuf,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Successful renders required before a job proceeds to stitching.
    pub min_success_scenes: usize,
    /// Externally reachable base URL; cached artifacts are served under
    /// `{public_base_url}/segments/{token}`.
    pub public_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio: AudioSettings::default(),
            cache_ttl: Duration::from_secs(30 * 60),
            cache_sweep_interval: Duration::from_secs(60),
            scratch_dir: std::env::temp_dir(),
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
            min_success_scenes: 1,
            public_base_url: "http://localhost:3000".into(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> T {
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|_| panic!("{key} has an invalid value"))
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                  |
    /// |----------------------------------|--------------------------|
    /// | `AUDIO_ENABLED`                  | `false`                  |
    /// | `AUDIO_MERGE_INTO_VIDEO`         | `true`                   |
    /// | `AUDIO_SYNC_MODE`                | `trim`                   |
    /// | `AUDIO_ERROR_STRATEGY`           | `continue_with_silence`  |
    /// | `AUDIO_CONTINUATION_WINDOW_SECS` | `1.0`                    |
    /// | `AUDIO_CROSSFADE_SECS`           | `0.1`                    |
    /// | `CACHE_TTL_SECS`                 | `1800`                   |
    /// | `CACHE_SWEEP_INTERVAL_SECS`      | `60`                     |
    /// | `SCRATCH_DIR`                    | system temp dir          |
    /// | `FFMPEG_BIN` / `FFPROBE_BIN`     | `ffmpeg` / `ffprobe`     |
    /// | `MIN_SUCCESS_SCENES`             | `1`                      |
    /// | `PUBLIC_BASE_URL`                | `http://localhost:3000`  |
    pub fn from_env() -> Self {
        let sync_mode = SyncMode::parse(
            &std::env::var("AUDIO_SYNC_MODE").unwrap_or_else(|_| "trim".into()),
        )
        .expect("AUDIO_SYNC_MODE must be trim, stretch or tempo");
        let error_strategy = AudioErrorStrategy::parse(
            &std::env::var("AUDIO_ERROR_STRATEGY")
                .unwrap_or_else(|_| "continue_with_silence".into()),
        )
        .expect("AUDIO_ERROR_STRATEGY must be continue_with_silence or halt");

        let audio = AudioSettings {
            enabled: env_parse("AUDIO_ENABLED", "false"),
            merge_into_video: env_parse("AUDIO_MERGE_INTO_VIDEO", "true"),
            sync_mode,
            error_strategy,
            continuation_window_secs: env_parse("AUDIO_CONTINUATION_WINDOW_SECS", "1.0"),
            crossfade_secs: env_parse("AUDIO_CROSSFADE_SECS", "0.1"),
        };

        let scratch_dir = std::env::var("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        Self {
            audio,
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", "1800")),
            cache_sweep_interval: Duration::from_secs(env_parse("CACHE_SWEEP_INTERVAL_SECS", "60")),
            scratch_dir,
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".into()),
            ffprobe_bin: std::env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".into()),
            min_success_scenes: env_parse("MIN_SUCCESS_SCENES", "1"),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
        }
    }
}

use std::time::Duration;

use storyreel_core::render::RenderModel;

use crate::poll::PollConfig;

/// Default MusicGen version on Replicate.
pub const DEFAULT_MUSIC_MODEL_VERSION: &str =
    "671ac645ce5e552cc63a54a2bbff63fcf798043055d2dac5fc9e36a837eedcfb";

/// Provider credentials, model selection and poll bounds.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_token: String,
    pub default_render_model: RenderModel,
    pub music_model_version: String,
    pub poll: PollConfig,
}

impl ProviderConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                        |
    /// |-------------------------|--------------------------------|
    /// | `REPLICATE_API_URL`     | `https://api.replicate.com/v1` |
    /// | `REPLICATE_API_TOKEN`   | empty                          |
    /// | `RENDER_DEFAULT_MODEL`  | `kling-v2.1`                   |
    /// | `MUSIC_MODEL_VERSION`   | MusicGen stereo-melody         |
    /// | `POLL_INITIAL_DELAY_MS` | `1000`                         |
    /// | `POLL_MAX_DELAY_SECS`   | `60`                           |
    /// | `POLL_MAX_ATTEMPTS`     | `30`                           |
    /// | `POLL_MAX_ELAPSED_SECS` | `1800`                         |
    pub fn from_env() -> Self {
        let api_url = std::env::var("REPLICATE_API_URL")
            .unwrap_or_else(|_| "https://api.replicate.com/v1".into());
        let api_token = std::env::var("REPLICATE_API_TOKEN").unwrap_or_default();

        let default_render_model = RenderModel::parse(
            &std::env::var("RENDER_DEFAULT_MODEL").unwrap_or_else(|_| "kling-v2.1".into()),
        )
        .expect("RENDER_DEFAULT_MODEL must name a supported render model");

        let music_model_version = std::env::var("MUSIC_MODEL_VERSION")
            .unwrap_or_else(|_| DEFAULT_MUSIC_MODEL_VERSION.into());

        let initial_delay_ms: u64 = std::env::var("POLL_INITIAL_DELAY_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("POLL_INITIAL_DELAY_MS must be a valid u64");
        let max_delay_secs: u64 = std::env::var("POLL_MAX_DELAY_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("POLL_MAX_DELAY_SECS must be a valid u64");
        let max_attempts: u32 = std::env::var("POLL_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("POLL_MAX_ATTEMPTS must be a valid u32");
        let max_elapsed_secs: u64 = std::env::var("POLL_MAX_ELAPSED_SECS")
            .unwrap_or_else(|_| "1800".into())
            .parse()
            .expect("POLL_MAX_ELAPSED_SECS must be a valid u64");

        Self {
            api_url,
            api_token,
            default_render_model,
            music_model_version,
            poll: PollConfig {
                initial_delay: Duration::from_millis(initial_delay_ms),
                max_delay: Duration::from_secs(max_delay_secs),
                max_attempts,
                max_elapsed: Duration::from_secs(max_elapsed_secs),
                ..PollConfig::default()
            },
        }
    }
}

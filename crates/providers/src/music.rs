//! Music generation providers with continuation support.

use async_trait::async_trait;
use bytes::Bytes;

use crate::api::ReplicateApi;
use crate::error::ProviderError;
use crate::poll::{poll_until_settled, retry_transient, PollConfig};

/// What span of the soundtrack a provider response covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// The whole track so far, including everything that was continued from.
    Cumulative,
    /// Only the newly generated segment.
    Increment,
}

/// Reference to prior audio a continuation call should extend.
#[derive(Debug, Clone, PartialEq)]
pub struct Continuation {
    /// Fetchable location of the prior audio.
    pub url: String,
    pub window_start_secs: f64,
    pub window_end_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeRequest {
    pub prompt: String,
    pub duration_secs: f64,
    pub seed: Option<i64>,
    pub continuation: Option<Continuation>,
}

impl ComposeRequest {
    pub fn length_ms(&self) -> u64 {
        (self.duration_secs.max(0.0) * 1000.0).round() as u64
    }
}

#[derive(Debug, Clone)]
pub struct ComposedAudio {
    pub bytes: Bytes,
    /// Provider-hosted location of `bytes`, when the provider exposes one.
    pub hosted_url: Option<String>,
    pub coverage: Coverage,
}

#[async_trait]
pub trait MusicProvider: Send + Sync {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedAudio, ProviderError>;
}

/// MusicGen on Replicate, pinned to one model version.
pub struct ReplicateMusic {
    api: ReplicateApi,
    version: String,
    poll: PollConfig,
}

impl ReplicateMusic {
    pub fn new(api: ReplicateApi, version: String, poll: PollConfig) -> Self {
        Self { api, version, poll }
    }
}

/// Prediction input for a compose call.
pub fn music_input(request: &ComposeRequest) -> serde_json::Value {
    let mut input = serde_json::json!({
        "prompt": request.prompt,
        "duration": request.duration_secs.ceil().max(1.0) as u64,
        "model_version": "stereo-melody-large",
        "output_format": "mp3",
        "normalization_strategy": "loudness",
    });
    if let Some(seed) = request.seed {
        input["seed"] = serde_json::json!(seed);
    }
    if let Some(cont) = &request.continuation {
        input["continuation"] = serde_json::Value::Bool(true);
        input["input_audio"] = serde_json::Value::String(cont.url.clone());
        // Whole seconds only; the end is floored so the window never reaches
        // past the audio that actually exists.
        let end = cont.window_end_secs.max(0.0).floor();
        let width = (cont.window_end_secs - cont.window_start_secs).max(0.0);
        let start = (end - width.ceil()).max(0.0);
        input["continuation_start"] = serde_json::json!(start as u64);
        if end > start {
            input["continuation_end"] = serde_json::json!(end as u64);
        }
    }
    input
}

#[async_trait]
impl MusicProvider for ReplicateMusic {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedAudio, ProviderError> {
        let api = &self.api;
        let version = self.version.as_str();
        let prediction = retry_transient("music submission", &self.poll, move || async move {
            api.create_version_prediction(version, music_input(request)).await
        })
        .await?;
        let handle = prediction.id.clone();
        tracing::debug!(
            handle = %handle,
            length_ms = request.length_ms(),
            continuation = request.continuation.is_some(),
            "Music generation submitted"
        );

        let id = handle.as_str();
        let settled = poll_until_settled(id, &self.poll, move || async move {
            api.get_prediction(id).await?.into_remote_job()
        })
        .await?;

        let url = settled.output_url.ok_or_else(|| {
            ProviderError::Decode(format!("music prediction {handle} succeeded without output"))
        })?;
        let output = url.as_str();
        let bytes = retry_transient(id, &self.poll, move || async move {
            api.download(output).await
        })
        .await?;

        Ok(ComposedAudio {
            bytes,
            hosted_url: Some(url),
            coverage: Coverage::Increment,
        })
    }
}

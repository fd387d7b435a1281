//! Image-to-video render providers.

use async_trait::async_trait;
use bytes::Bytes;
use storyreel_core::render::{RenderModel, RenderRequest};

use crate::api::ReplicateApi;
use crate::error::ProviderError;
use crate::poll::RemoteJob;

/// An external render provider: submit, poll by handle, download output.
#[async_trait]
pub trait RenderProvider: Send + Sync {
    /// Submit a render and return the provider's opaque job handle.
    async fn submit(&self, request: &RenderRequest) -> Result<String, ProviderError>;

    async fn poll(&self, handle: &str) -> Result<RemoteJob, ProviderError>;

    async fn download(&self, url: &str) -> Result<Bytes, ProviderError>;
}

/// Render provider backed by Replicate's official video models.
pub struct ReplicateRender {
    api: ReplicateApi,
}

impl ReplicateRender {
    pub fn new(api: ReplicateApi) -> Self {
        Self { api }
    }
}

/// Model-specific input payload. Each model names its reference-frame
/// fields differently.
pub fn render_input(request: &RenderRequest) -> serde_json::Value {
    let (first_key, last_key) = match request.model {
        RenderModel::KlingV21 => ("start_image", "end_image"),
        RenderModel::SeedanceLite => ("image", "last_frame_image"),
        RenderModel::Hailuo02 => ("first_frame_image", "last_frame_image"),
    };
    let mut input = serde_json::json!({
        "prompt": request.prompt,
        "duration": request.duration_secs,
        "aspect_ratio": request.aspect_ratio,
    });
    input[first_key] = serde_json::Value::String(request.first_frame_url.clone());
    input[last_key] = serde_json::Value::String(request.last_frame_url.clone());
    input
}

#[async_trait]
impl RenderProvider for ReplicateRender {
    async fn submit(&self, request: &RenderRequest) -> Result<String, ProviderError> {
        let prediction = self
            .api
            .create_model_prediction(request.model.provider_id(), render_input(request))
            .await?;
        tracing::debug!(
            model = request.model.key(),
            handle = %prediction.id,
            duration_secs = request.duration_secs,
            "Render submitted"
        );
        Ok(prediction.id)
    }

    async fn poll(&self, handle: &str) -> Result<RemoteJob, ProviderError> {
        self.api.get_prediction(handle).await?.into_remote_job()
    }

    async fn download(&self, url: &str) -> Result<Bytes, ProviderError> {
        self.api.download(url).await
    }
}

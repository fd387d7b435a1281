//! REST client for Replicate-style prediction endpoints.
//!
//! Wraps prediction creation, status retrieval and output download using
//! [`reqwest`].

use bytes::Bytes;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::poll::{RemoteJob, RemoteStatus};

/// HTTP client for one prediction API.
#[derive(Clone)]
pub struct ReplicateApi {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
}

/// A prediction as returned by the create and get endpoints.
#[derive(Debug, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    /// A single URL, a list of URLs, or absent until the job succeeds.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Prediction {
    /// First output URL, whether the provider returned a string or a list.
    pub fn output_url(&self) -> Option<String> {
        match self.output.as_ref()? {
            serde_json::Value::String(url) => Some(url.clone()),
            serde_json::Value::Array(items) => items
                .iter()
                .find_map(|v| v.as_str().map(str::to_string)),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Map onto the provider-neutral poll view.
    pub fn into_remote_job(self) -> Result<RemoteJob, ProviderError> {
        let status = RemoteStatus::parse(&self.status).ok_or_else(|| {
            ProviderError::Decode(format!("unknown prediction status '{}'", self.status))
        })?;
        Ok(RemoteJob {
            output_url: self.output_url(),
            error: self.error_message(),
            handle: self.id,
            status,
        })
    }
}

impl ReplicateApi {
    /// * `api_url` - Base URL, e.g. `https://api.replicate.com/v1`.
    pub fn new(api_url: String, api_token: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_token)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: String, api_token: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    /// Create a prediction against an official model (`owner/name`).
    pub async fn create_model_prediction(
        &self,
        model: &str,
        input: serde_json::Value,
    ) -> Result<Prediction, ProviderError> {
        let response = self
            .client
            .post(format!("{}/models/{model}/predictions", self.api_url))
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Create a prediction against a pinned model version.
    pub async fn create_version_prediction(
        &self,
        version: &str,
        input: serde_json::Value,
    ) -> Result<Prediction, ProviderError> {
        let response = self
            .client
            .post(format!("{}/predictions", self.api_url))
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "version": version, "input": input }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    pub async fn get_prediction(&self, id: &str) -> Result<Prediction, ProviderError> {
        let response = self
            .client
            .get(format!("{}/predictions/{id}", self.api_url))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Plain binary download of an output URL.
    pub async fn download(&self, url: &str) -> Result<Bytes, ProviderError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?)
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn prediction(json: serde_json::Value) -> Prediction {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn output_url_from_string_or_list() {
        let single = prediction(serde_json::json!({
            "id": "p1", "status": "succeeded", "output": "https://cdn/out.mp4"
        }));
        assert_eq!(single.output_url().as_deref(), Some("https://cdn/out.mp4"));

        let list = prediction(serde_json::json!({
            "id": "p2", "status": "succeeded", "output": ["https://cdn/a.mp3", "https://cdn/b.mp3"]
        }));
        assert_eq!(list.output_url().as_deref(), Some("https://cdn/a.mp3"));
    }

    #[test]
    fn pending_prediction_has_no_output() {
        let p = prediction(serde_json::json!({ "id": "p3", "status": "starting", "output": null }));
        assert!(p.output_url().is_none());
        assert!(p.error_message().is_none());
        let job = p.into_remote_job().unwrap();
        assert_eq!(job.status, RemoteStatus::Starting);
        assert_eq!(job.handle, "p3");
    }

    #[test]
    fn failed_prediction_carries_error() {
        let p = prediction(serde_json::json!({
            "id": "p4", "status": "failed", "error": "NSFW content detected"
        }));
        let job = p.into_remote_job().unwrap();
        assert_eq!(job.status, RemoteStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("NSFW content detected"));
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let p = prediction(serde_json::json!({ "id": "p5", "status": "exploded" }));
        assert_matches!(p.into_remote_job(), Err(ProviderError::Decode(_)));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ReplicateApi::new("https://api.example.com/v1/".into(), "t".into());
        assert_eq!(api.api_url, "https://api.example.com/v1");
    }
}

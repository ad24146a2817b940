//! HTTP client for a JSON image generation endpoint.
//!
//! Request body:
//!
//! ```json
//! { "images": [{ "base64Data": "...", "mimeType": "image/png" }],
//!   "parameters": { ... },
//!   "count": 2 }
//! ```
//!
//! Response body: `{ "images": [{ "base64Data": "...", "mimeType": "..." }] }`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{GeneratedArtifact, GenerationApi, GenerationError};
use crate::error::truncate_message;
use crate::types::state_data::DownloadedImage;

const MAX_BODY_IN_ERROR: usize = 200;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InputImage<'a> {
    base64_data: &'a str,
    mime_type: &'a str,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    images: Vec<InputImage<'a>>,
    parameters: &'a Map<String, Value>,
    count: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    images: Vec<GeneratedArtifact>,
}

/// [`GenerationApi`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerationClient {
    /// Creates a client posting to `endpoint` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// [`GenerationError::Transport`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// The endpoint requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(err: &reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Transport("request timed out".to_string())
        } else if err.is_decode() {
            GenerationError::InvalidResponse(err.to_string())
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl GenerationApi for HttpGenerationClient {
    async fn generate(
        &self,
        images: &[DownloadedImage],
        params: &Map<String, Value>,
        count: u32,
    ) -> Result<Vec<GeneratedArtifact>, GenerationError> {
        let request = GenerateRequest {
            images: images
                .iter()
                .map(|image| InputImage {
                    base64_data: &image.base64_data,
                    mime_type: &image.mime_type,
                })
                .collect(),
            parameters: params,
            count,
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            inputs = images.len(),
            count = count,
            "calling generation API"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: truncate_message(&body, MAX_BODY_IN_ERROR),
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| Self::classify(&e))?;
        if parsed.images.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(parsed.images)
    }
}

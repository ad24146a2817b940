//! Image generation API collaborator.
//!
//! The generation worker talks to the model through [`GenerationApi`]. The
//! crate ships an HTTP client behind the `http-client` feature; tests supply
//! their own implementations.

#[cfg(feature = "http-client")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::state_data::DownloadedImage;

#[cfg(feature = "http-client")]
pub use http::HttpGenerationClient;

/// One image returned by the generation API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifact {
    /// Base64-encoded image bytes.
    pub base64_data: String,
    /// MIME type of the image.
    pub mime_type: String,
}

/// Errors from a generation call. All of them count as a failed attempt of
/// the `generating` stage.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The API answered with a non-success status.
    #[error("generation API returned {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The request never completed.
    #[error("generation request failed: {0}")]
    Transport(String),

    /// The response could not be understood.
    #[error("invalid generation response: {0}")]
    InvalidResponse(String),

    /// The API succeeded but produced no images.
    #[error("generation API returned no images")]
    Empty,
}

/// Client for the image generation model.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// Generates `count` images from the given inputs and parameters.
    ///
    /// # Errors
    ///
    /// Any [`GenerationError`].
    async fn generate(
        &self,
        images: &[DownloadedImage],
        params: &Map<String, Value>,
        count: u32,
    ) -> Result<Vec<GeneratedArtifact>, GenerationError>;
}

/// Offline generator that returns the input images, cycling through them
/// until `count` artifacts are produced. Parameters are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGenerator;

#[async_trait]
impl GenerationApi for EchoGenerator {
    async fn generate(
        &self,
        images: &[DownloadedImage],
        _params: &Map<String, Value>,
        count: u32,
    ) -> Result<Vec<GeneratedArtifact>, GenerationError> {
        if images.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(images
            .iter()
            .cycle()
            .take(count as usize)
            .map(|image| GeneratedArtifact {
                base64_data: image.base64_data.clone(),
                mime_type: image.mime_type.clone(),
            })
            .collect())
    }
}

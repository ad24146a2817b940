//! `uploading`: persists generated images and records their public URLs.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::join_all;

use super::{HandlerError, StageHandler, StageOutcome};
use crate::blob::{BlobError, BlobStore};
use crate::domain::TaskRecord;
use crate::types::state_data::{GeneratedImage, StatePatch, UploadedImage};
use crate::types::status::TaskStatus;

pub struct UploadingHandler {
    blobs: Arc<dyn BlobStore>,
}

impl UploadingHandler {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    async fn upload(&self, image: &GeneratedImage) -> Result<UploadedImage, BlobError> {
        let bytes = STANDARD
            .decode(image.base64_data.as_bytes())
            .map_err(|e| BlobError::Invalid {
                reference: image.artifact_id.clone(),
                message: format!("artifact is not valid base64: {e}"),
            })?;
        let url = self
            .blobs
            .upload(&image.artifact_id, bytes, &image.mime_type)
            .await?;
        Ok(UploadedImage {
            artifact_id: image.artifact_id.clone(),
            url,
            mime_type: image.mime_type.clone(),
        })
    }
}

#[async_trait]
impl StageHandler for UploadingHandler {
    fn stage(&self) -> TaskStatus {
        TaskStatus::Uploading
    }

    async fn process(&self, task: &TaskRecord) -> Result<StageOutcome, HandlerError> {
        let generated = task.state_data.generated();
        let results = join_all(generated.iter().map(|image| self.upload(image))).await;

        let mut uploaded = Vec::with_capacity(results.len());
        let mut last_error = None;
        for (image, result) in generated.iter().zip(results) {
            match result {
                Ok(done) => uploaded.push(done),
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        artifact_id = %image.artifact_id,
                        error = %e,
                        "artifact upload failed, skipping"
                    );
                    last_error = Some(e.to_string());
                },
            }
        }

        if !generated.is_empty() && uploaded.is_empty() {
            return Err(HandlerError::Exhausted {
                stage: TaskStatus::Uploading,
                attempted: generated.len(),
                last_error: last_error.unwrap_or_default(),
            });
        }

        tracing::info!(task_id = %task.id, uploaded = uploaded.len(), "artifacts uploaded");
        Ok(StageOutcome::Advance {
            next: TaskStatus::Completed,
            patch: StatePatch::Uploaded(uploaded),
        })
    }
}

//! `downloading`: fetches every input image and normalises it to base64.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{HandlerError, StageHandler, StageOutcome};
use crate::blob::{decode_payload, BlobError, BlobStore};
use crate::config::DownloadConfig;
use crate::domain::TaskRecord;
use crate::types::params::ImageRef;
use crate::types::state_data::{DownloadedImage, StatePatch};
use crate::types::status::TaskStatus;

/// Downloads `params.images` through a [`BlobStore`].
///
/// Items that fail are logged and dropped. The stage fails only when the
/// input list is non-empty and nothing could be downloaded. An empty input
/// list advances immediately with no fetches.
pub struct DownloadingHandler {
    blobs: Arc<dyn BlobStore>,
    config: DownloadConfig,
}

impl DownloadingHandler {
    pub fn new(blobs: Arc<dyn BlobStore>, config: DownloadConfig) -> Self {
        Self { blobs, config }
    }

    async fn fetch(&self, reference: &ImageRef) -> Result<DownloadedImage, BlobError> {
        let payload = self.blobs.download(reference).await?;
        let encoded = decode_payload(reference, payload, &self.config.default_mime_type)?;
        Ok(DownloadedImage {
            file_id: reference.to_string(),
            size: encoded.size,
            base64_data: encoded.base64_data,
            mime_type: encoded.mime_type,
        })
    }
}

#[async_trait]
impl StageHandler for DownloadingHandler {
    fn stage(&self) -> TaskStatus {
        TaskStatus::Downloading
    }

    async fn process(&self, task: &TaskRecord) -> Result<StageOutcome, HandlerError> {
        let references = &task.params.images;
        if references.is_empty() {
            return Ok(StageOutcome::Advance {
                next: TaskStatus::Downloaded,
                patch: StatePatch::Downloaded(Vec::new()),
            });
        }

        let fetches: Vec<_> = references
            .iter()
            .map(|reference| async move { (reference, self.fetch(reference).await) })
            .collect();
        let results: Vec<_> = stream::iter(fetches)
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut downloaded = Vec::with_capacity(results.len());
        let mut last_error = None;
        for (reference, result) in results {
            match result {
                Ok(image) => downloaded.push(image),
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        image = %reference,
                        error = %e,
                        "image download failed, skipping"
                    );
                    last_error = Some(e.to_string());
                },
            }
        }

        if downloaded.is_empty() {
            return Err(HandlerError::Exhausted {
                stage: TaskStatus::Downloading,
                attempted: references.len(),
                last_error: last_error.unwrap_or_default(),
            });
        }

        tracing::info!(
            task_id = %task.id,
            downloaded = downloaded.len(),
            requested = references.len(),
            "images downloaded"
        );
        Ok(StageOutcome::Advance {
            next: TaskStatus::Downloaded,
            patch: StatePatch::Downloaded(downloaded),
        })
    }
}

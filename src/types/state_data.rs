//! Per-stage accumulated task data.
//!
//! [`StateData`] holds one typed slot per producing stage. Stages contribute
//! through a [`StatePatch`], which names the slot it fills and the status it
//! must be committed with. Slots are write-once: a patch aimed at a filled
//! slot is rejected instead of overwriting earlier stage output.
//!
//! | Slot                | Written by transition       |
//! |---------------------|-----------------------------|
//! | `downloaded_images` | `downloading -> downloaded` |
//! | `generated_images`  | `generating -> generated`   |
//! | `uploaded_images`   | `uploading -> completed`    |
//!
//! The `handoff` slot is dispatcher bookkeeping, not stage output, and is
//! replaced on every worker dispatch.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::types::status::TaskStatus;

/// An input image fetched during the `downloading` stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedImage {
    /// The reference the image was fetched from.
    pub file_id: String,
    /// Base64-encoded image bytes (no data-URI prefix).
    pub base64_data: String,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Decoded image size in bytes.
    pub size: usize,
}

/// An artifact returned by the generation API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    /// Identifier assigned when the worker recorded the artifact.
    pub artifact_id: String,
    /// Base64-encoded image bytes.
    pub base64_data: String,
    /// MIME type of the generated image.
    pub mime_type: String,
}

/// A generated artifact persisted to durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    /// The generated artifact this upload corresponds to.
    pub artifact_id: String,
    /// Public URL returned by blob storage.
    pub url: String,
    /// MIME type of the uploaded object.
    pub mime_type: String,
}

/// Bookkeeping recorded when a stage is delegated to a worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    /// Status the task was in when the worker was launched.
    pub stage: TaskStatus,
    /// RFC 3339 timestamp of the launch.
    pub dispatched_at: String,
    /// How many times a worker has been launched for this task.
    pub dispatch_count: u32,
    /// The task's `retry_count` when the worker was launched. While the two
    /// are equal the worker is still considered in flight.
    #[serde(default)]
    pub attempt: u32,
    /// Set once a relaunched worker has taken this hand-off.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub claimed: bool,
}

impl Handoff {
    /// Returns `true` if a failure has been recorded since this launch,
    /// given the task's current status and `retry_count`.
    ///
    /// A worker launched from an earlier status starts the current stage at
    /// a fresh retry count of zero.
    pub fn settled_by(&self, status: TaskStatus, retry_count: u32) -> bool {
        let baseline = if self.stage == status { self.attempt } else { 0 };
        retry_count > baseline
    }
}

/// Data accumulated across stages. See the module docs for slot ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateData {
    /// Set by the `downloading` stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_images: Option<Vec<DownloadedImage>>,
    /// Set by the generation worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_images: Option<Vec<GeneratedImage>>,
    /// Set by the `uploading` stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_images: Option<Vec<UploadedImage>>,
    /// Latest worker hand-off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<Handoff>,
}

/// A stage's contribution to [`StateData`], tagged by the slot it fills.
///
/// # Examples
///
/// ```
/// use photogen_tasks::{StatePatch, TaskStatus};
///
/// let patch = StatePatch::Downloaded(vec![]);
/// assert_eq!(patch.slot(), Some("downloaded_images"));
/// assert_eq!(patch.commits_with(), Some(TaskStatus::Downloaded));
/// assert_eq!(StatePatch::Empty.slot(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StatePatch {
    /// The transition carries no stage output.
    Empty,
    /// Output of the `downloading` stage.
    Downloaded(Vec<DownloadedImage>),
    /// Output of the generation worker.
    Generated(Vec<GeneratedImage>),
    /// Output of the `uploading` stage.
    Uploaded(Vec<UploadedImage>),
}

impl StatePatch {
    /// Returns the name of the slot this patch fills, or `None` for
    /// [`StatePatch::Empty`].
    pub fn slot(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Downloaded(_) => Some("downloaded_images"),
            Self::Generated(_) => Some("generated_images"),
            Self::Uploaded(_) => Some("uploaded_images"),
        }
    }

    /// Returns the status this patch must be committed together with.
    pub fn commits_with(&self) -> Option<TaskStatus> {
        match self {
            Self::Empty => None,
            Self::Downloaded(_) => Some(TaskStatus::Downloaded),
            Self::Generated(_) => Some(TaskStatus::Generated),
            Self::Uploaded(_) => Some(TaskStatus::Completed),
        }
    }

    /// Number of items carried by the patch.
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Downloaded(items) => items.len(),
            Self::Generated(items) => items.len(),
            Self::Uploaded(items) => items.len(),
        }
    }

    /// Returns `true` if the patch carries no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateData {
    /// Merges a patch committed alongside a transition to `new_status`.
    ///
    /// # Errors
    ///
    /// - [`TaskError::PatchMismatch`] if the patch belongs to a different
    ///   transition than the one being committed.
    /// - [`TaskError::StateDataConflict`] if the target slot is already filled.
    ///
    /// # Examples
    ///
    /// ```
    /// use photogen_tasks::{StateData, StatePatch, TaskStatus};
    ///
    /// let mut data = StateData::default();
    /// data.apply("t1", TaskStatus::Downloaded, StatePatch::Downloaded(vec![]))
    ///     .unwrap();
    /// assert_eq!(data.downloaded_images, Some(vec![]));
    ///
    /// // Write-once: a second patch for the same slot is rejected.
    /// assert!(data
    ///     .apply("t1", TaskStatus::Downloaded, StatePatch::Downloaded(vec![]))
    ///     .is_err());
    /// ```
    pub fn apply(
        &mut self,
        task_id: &str,
        new_status: TaskStatus,
        patch: StatePatch,
    ) -> Result<(), TaskError> {
        let Some(slot) = patch.slot() else {
            return Ok(());
        };
        if patch.commits_with() != Some(new_status) {
            return Err(TaskError::PatchMismatch {
                task_id: task_id.to_string(),
                slot,
                status: new_status,
            });
        }

        let filled = match &patch {
            StatePatch::Empty => false,
            StatePatch::Downloaded(_) => self.downloaded_images.is_some(),
            StatePatch::Generated(_) => self.generated_images.is_some(),
            StatePatch::Uploaded(_) => self.uploaded_images.is_some(),
        };
        if filled {
            return Err(TaskError::StateDataConflict {
                task_id: task_id.to_string(),
                slot,
            });
        }

        match patch {
            StatePatch::Empty => {},
            StatePatch::Downloaded(items) => self.downloaded_images = Some(items),
            StatePatch::Generated(items) => self.generated_images = Some(items),
            StatePatch::Uploaded(items) => self.uploaded_images = Some(items),
        }
        Ok(())
    }

    /// Returns the downloaded images, or an empty slice if the stage has not
    /// run yet.
    pub fn downloaded(&self) -> &[DownloadedImage] {
        self.downloaded_images.as_deref().unwrap_or_default()
    }

    /// Returns the generated images, or an empty slice.
    pub fn generated(&self) -> &[GeneratedImage] {
        self.generated_images.as_deref().unwrap_or_default()
    }

    /// Returns the uploaded images, or an empty slice.
    pub fn uploaded(&self) -> &[UploadedImage] {
        self.uploaded_images.as_deref().unwrap_or_default()
    }
}

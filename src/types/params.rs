//! Submission parameters for a photo-generation task.
//!
//! [`TaskParams`] is set once at creation and never mutated afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::constants::MAX_OUTPUT_COUNT;
use crate::error::TaskError;

/// Opaque reference to an input image held by the blob storage collaborator.
///
/// Serialized as a bare string.
///
/// # Examples
///
/// ```
/// use photogen_tasks::ImageRef;
///
/// let image = ImageRef::from("uploads/portrait-1.jpg");
/// assert_eq!(image.as_str(), "uploads/portrait-1.jpg");
/// assert_eq!(serde_json::to_value(&image).unwrap(), "uploads/portrait-1.jpg");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    /// Wraps a storage reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input payload of a task: source images, generation parameters, and the
/// number of outputs requested.
///
/// # Examples
///
/// ```
/// use photogen_tasks::TaskParams;
/// use serde_json::json;
///
/// let params: TaskParams = serde_json::from_value(json!({
///     "images": ["a.jpg", "b.jpg"],
///     "generationParams": { "style": "studio" },
///     "count": 4
/// }))
/// .unwrap();
/// assert_eq!(params.images.len(), 2);
/// assert_eq!(params.count, 4);
/// assert_eq!(params.generation_params["style"], "studio");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    /// Input image references, fetched by the `downloading` stage.
    #[serde(default)]
    pub images: Vec<ImageRef>,

    /// Free-form parameters forwarded verbatim to the generation API.
    #[serde(default)]
    pub generation_params: Map<String, Value>,

    /// Number of output images requested.
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl TaskParams {
    /// Creates params for the given images with one requested output and no
    /// extra generation parameters.
    pub fn new(images: impl IntoIterator<Item = ImageRef>) -> Self {
        Self {
            images: images.into_iter().collect(),
            generation_params: Map::new(),
            count: default_count(),
        }
    }

    /// Sets the requested output count.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Adds a generation parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.generation_params.insert(key.into(), value);
        self
    }

    /// Checks the params are processable.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidParams`] when `count` is zero or exceeds
    /// [`MAX_OUTPUT_COUNT`], or when an image reference is blank.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.count == 0 || self.count > MAX_OUTPUT_COUNT {
            return Err(TaskError::InvalidParams {
                message: format!(
                    "count must be between 1 and {MAX_OUTPUT_COUNT}, got {}",
                    self.count
                ),
            });
        }
        if let Some(index) = self.images.iter().position(|r| r.as_str().trim().is_empty()) {
            return Err(TaskError::InvalidParams {
                message: format!("image reference at index {index} is empty"),
            });
        }
        Ok(())
    }
}

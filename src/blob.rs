//! Blob storage collaborator.
//!
//! [`BlobStore`] is the seam between the pipeline and wherever input images
//! live and generated images go. A download yields either raw bytes or a
//! pre-embedded data URI ([`BlobPayload`]); [`decode_payload`] normalises
//! both into base64 plus a MIME type.
//!
//! [`FsBlobStore`] is a filesystem implementation used by the CLI.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;

use crate::types::params::ImageRef;

/// Errors from a single blob download or upload.
///
/// These are per-item failures: stages log them and carry on with the rest
/// of the batch.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Nothing is stored under the reference.
    #[error("blob not found: {reference}")]
    NotFound {
        /// The missing reference.
        reference: String,
    },

    /// The blob exists but could not be read or written.
    #[error("blob I/O failed for {reference}: {source}")]
    Io {
        /// The reference being accessed.
        reference: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The blob content is unusable (e.g. malformed data URI).
    #[error("invalid blob {reference}: {message}")]
    Invalid {
        /// The offending reference.
        reference: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Raw result of a blob download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobPayload {
    /// Binary image bytes with no type information.
    Bytes(Vec<u8>),
    /// A `data:image/<ext>;base64,<payload>` string.
    DataUri(String),
}

/// An image normalised to base64 with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Base64 payload without any data-URI prefix.
    pub base64_data: String,
    /// MIME type, either parsed from the data URI or defaulted.
    pub mime_type: String,
    /// Decoded image size in bytes.
    pub size: usize,
}

/// Storage for input and output images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetches the blob behind an input reference.
    ///
    /// # Errors
    ///
    /// Any [`BlobError`]; callers treat it as a per-item failure.
    async fn download(&self, reference: &ImageRef) -> Result<BlobPayload, BlobError>;

    /// Persists bytes under `key` and returns a public URL for them.
    ///
    /// # Errors
    ///
    /// Any [`BlobError`]; callers treat it as a per-item failure.
    async fn upload(&self, key: &str, bytes: Vec<u8>, mime_type: &str)
        -> Result<String, BlobError>;
}

fn data_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^data:(image/[A-Za-z0-9.+-]+);base64,(.+)$")
            .expect("data URI pattern is a valid regex")
    })
}

/// Splits a `data:image/<ext>;base64,<payload>` URI into its MIME type and
/// payload. Returns `None` if the string is not an image data URI or the
/// payload is not valid base64.
///
/// # Examples
///
/// ```
/// use photogen_tasks::blob::parse_data_uri;
///
/// let parsed = parse_data_uri("data:image/png;base64,iVBORw0KGgo=").unwrap();
/// assert_eq!(parsed.mime_type, "image/png");
/// assert_eq!(parsed.base64_data, "iVBORw0KGgo=");
/// assert_eq!(parsed.size, 8);
///
/// assert!(parse_data_uri("https://example.com/a.png").is_none());
/// ```
pub fn parse_data_uri(uri: &str) -> Option<EncodedImage> {
    let captures = data_uri_pattern().captures(uri.trim())?;
    let base64_data = captures[2].trim().to_string();
    let size = STANDARD.decode(&base64_data).ok()?.len();
    Some(EncodedImage {
        mime_type: captures[1].to_ascii_lowercase(),
        base64_data,
        size,
    })
}

/// Normalises a downloaded payload into base64 and a MIME type.
///
/// Data URIs are parsed directly; raw bytes are base64-encoded and given
/// `default_mime_type`.
///
/// # Errors
///
/// [`BlobError::Invalid`] if a data-URI payload is not an image data URI or
/// a raw payload is empty.
pub fn decode_payload(
    reference: &ImageRef,
    payload: BlobPayload,
    default_mime_type: &str,
) -> Result<EncodedImage, BlobError> {
    match payload {
        BlobPayload::DataUri(uri) => parse_data_uri(&uri).ok_or_else(|| BlobError::Invalid {
            reference: reference.to_string(),
            message: "not a base64 image data URI".to_string(),
        }),
        BlobPayload::Bytes(bytes) if bytes.is_empty() => Err(BlobError::Invalid {
            reference: reference.to_string(),
            message: "empty blob".to_string(),
        }),
        BlobPayload::Bytes(bytes) => Ok(EncodedImage {
            base64_data: STANDARD.encode(&bytes),
            mime_type: default_mime_type.to_string(),
            size: bytes.len(),
        }),
    }
}

/// File extension for a MIME type, used when naming uploaded objects.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// Filesystem-backed [`BlobStore`].
///
/// References resolve relative to `input_root` (absolute paths are used
/// as-is). A file whose content starts with `data:` is returned as a
/// [`BlobPayload::DataUri`]. Uploads are written to `output_dir` and
/// addressed by `file://` URLs.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    input_root: PathBuf,
    output_dir: PathBuf,
}

impl FsBlobStore {
    /// Creates a store reading from `input_root` and writing to `output_dir`.
    pub fn new(input_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_dir: output_dir.into(),
        }
    }

    fn resolve(&self, reference: &ImageRef) -> PathBuf {
        let path = Path::new(reference.as_str());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.input_root.join(path)
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download(&self, reference: &ImageRef) -> Result<BlobPayload, BlobError> {
        let path = self.resolve(reference);
        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound {
                    reference: reference.to_string(),
                }
            } else {
                BlobError::Io {
                    reference: reference.to_string(),
                    source,
                }
            }
        })?;

        if bytes.starts_with(b"data:") {
            let text = String::from_utf8(bytes).map_err(|e| BlobError::Invalid {
                reference: reference.to_string(),
                message: format!("data URI is not UTF-8: {e}"),
            })?;
            return Ok(BlobPayload::DataUri(text));
        }
        Ok(BlobPayload::Bytes(bytes))
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, BlobError> {
        let io_err = |source| BlobError::Io {
            reference: key.to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(io_err)?;
        let path = self
            .output_dir
            .join(format!("{key}.{}", extension_for(mime_type)));
        tokio::fs::write(&path, bytes).await.map_err(io_err)?;
        let absolute = tokio::fs::canonicalize(&path).await.map_err(io_err)?;
        Ok(format!("file://{}", absolute.display()))
    }
}

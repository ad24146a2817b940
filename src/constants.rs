//! Pipeline-wide constants.

/// Upper bound on `TaskParams::count`.
pub const MAX_OUTPUT_COUNT: u32 = 16;

/// Maximum number of characters of a failure message persisted in
/// `TaskRecord::error`. Longer messages are truncated.
pub const MAX_ERROR_LEN: usize = 500;

/// MIME type assumed for raw binary blobs that carry no type information.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Default retry ceiling applied by the dispatcher.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

//! TOML pipeline configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.
//!
//! # Example TOML
//!
//! ```toml
//! [retry]
//! max_retries = 3
//! backoff_base_ms = 1000
//! backoff_max_ms = 60000
//!
//! [budgets]
//! downloading_ms = 60000
//! uploading_ms = 60000
//! worker_ms = 600000
//!
//! [download]
//! default_mime_type = "image/jpeg"
//! concurrency = 4
//!
//! [generation]
//! endpoint = "http://localhost:8080/generate"
//! timeout_ms = 300000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_MIME_TYPE};
use crate::types::status::TaskStatus;

/// Errors from loading or validating a [`PipelineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file is not valid TOML or does not match the schema.
    #[error("Failed to parse config TOML: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    /// The config parsed but contains unusable values.
    #[error("Config validation error: {message}")]
    Validation { message: String },

    /// The config file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retry ceiling and backoff hints.
    pub retry: RetryPolicy,
    /// Per-stage execution time budgets.
    pub budgets: StageBudgets,
    /// `downloading` stage settings.
    pub download: DownloadConfig,
    /// Generation API settings.
    pub generation: GenerationConfig,
}

impl PipelineConfig {
    /// Parses and validates a TOML string.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Validation`].
    ///
    /// # Examples
    ///
    /// ```
    /// use photogen_tasks::config::PipelineConfig;
    ///
    /// let config = PipelineConfig::from_toml_str("[retry]\nmax_retries = 5\n").unwrap();
    /// assert_eq!(config.retry.max_retries, 5);
    /// assert_eq!(config.download.default_mime_type, "image/jpeg");
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as for
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] describing the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.retry.max_retries == 0 {
            return invalid("retry.max_retries must be at least 1");
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return invalid("retry.backoff_base_ms must not exceed retry.backoff_max_ms");
        }
        if self.download.concurrency == 0 {
            return invalid("download.concurrency must be at least 1");
        }
        if !self.download.default_mime_type.starts_with("image/") {
            return invalid("download.default_mime_type must be an image/* MIME type");
        }
        if self.generation.timeout_ms == 0 {
            return invalid("generation.timeout_ms must be positive");
        }
        let budgets = &self.budgets;
        let all_budgets = [
            budgets.created_ms,
            budgets.downloading_ms,
            budgets.downloaded_ms,
            budgets.generating_ms,
            budgets.generated_ms,
            budgets.uploading_ms,
            budgets.worker_ms,
        ];
        if all_budgets.contains(&0) {
            return invalid("budgets must all be positive");
        }
        Ok(())
    }
}

/// How many times a stage may fail and how long to wait between attempts.
///
/// `max_retries` counts failed attempts per stage: the attempt that brings
/// `retry_count` up to it moves the task to `failed`. The counter resets
/// whenever the task advances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed attempts per stage before the task is failed.
    pub max_retries: u32,
    /// Backoff hint after the first failure.
    pub backoff_base_ms: u64,
    /// Upper bound for the backoff hint.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff hint for the given failed attempt (1-based),
    /// capped at `backoff_max_ms`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use photogen_tasks::config::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.backoff(1), Duration::from_secs(1));
    /// assert_eq!(policy.backoff(3), Duration::from_secs(4));
    /// assert_eq!(policy.backoff(30), Duration::from_secs(60));
    /// ```
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = self
            .backoff_base_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(millis)
    }
}

/// Time budgets for each dispatcher stage and for a worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageBudgets {
    pub created_ms: u64,
    pub downloading_ms: u64,
    pub downloaded_ms: u64,
    pub generating_ms: u64,
    pub generated_ms: u64,
    pub uploading_ms: u64,
    /// Budget for one generation worker run.
    pub worker_ms: u64,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            created_ms: 5_000,
            downloading_ms: 60_000,
            downloaded_ms: 5_000,
            generating_ms: 5_000,
            generated_ms: 5_000,
            uploading_ms: 60_000,
            worker_ms: 600_000,
        }
    }
}

impl StageBudgets {
    /// Budget for the handler registered on `status`. Terminal statuses have
    /// no handler and get the shortest budget.
    pub fn for_stage(&self, status: TaskStatus) -> Duration {
        let millis = match status {
            TaskStatus::Created => self.created_ms,
            TaskStatus::Downloading => self.downloading_ms,
            TaskStatus::Downloaded => self.downloaded_ms,
            TaskStatus::Generating => self.generating_ms,
            TaskStatus::Generated => self.generated_ms,
            TaskStatus::Uploading => self.uploading_ms,
            TaskStatus::Completed | TaskStatus::Failed => self.created_ms,
        };
        Duration::from_millis(millis)
    }

    /// Budget for one generation worker run.
    pub fn worker(&self) -> Duration {
        Duration::from_millis(self.worker_ms)
    }
}

/// Settings for the `downloading` stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// MIME type given to raw (non data-URI) downloads.
    pub default_mime_type: String,
    /// Maximum concurrent fetches per task.
    pub concurrency: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            default_mime_type: DEFAULT_MIME_TYPE.to_string(),
            concurrency: 4,
        }
    }
}

/// Settings for the generation API client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// HTTP endpoint of the generation API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 300_000,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

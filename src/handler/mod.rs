//! Per-status stage handlers.
//!
//! Each non-terminal status has at most one [`StageHandler`]. A handler
//! reads the task as loaded by the dispatcher and returns a
//! [`StageOutcome`] describing what should be committed; it never writes to
//! the task store itself. [`HandlerRegistry`] maps statuses to handlers.
//!
//! | Status        | Handler                                    | Outcome                         |
//! |---------------|--------------------------------------------|---------------------------------|
//! | `created`     | [`CreatedHandler`]                         | advance to `downloading`        |
//! | `downloading` | [`DownloadingHandler`]                     | advance with downloaded images  |
//! | `downloaded`  | [`DownloadedHandler`]                      | hand off to the generation worker |
//! | `generating`  | [`GeneratingHandler`]                      | wait, or relaunch a failed worker |
//! | `generated`   | [`GeneratedHandler`]                       | advance to `uploading`          |
//! | `uploading`   | [`UploadingHandler`]                       | advance with uploaded URLs      |

pub mod downloading;
pub mod handoff;
pub mod passthrough;
pub mod uploading;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::blob::BlobStore;
use crate::config::PipelineConfig;
use crate::domain::TaskRecord;
use crate::generation::GenerationError;
use crate::types::state_data::StatePatch;
use crate::types::status::TaskStatus;
use crate::worker::{InvokeError, WorkerSnapshot};

pub use downloading::DownloadingHandler;
pub use handoff::{DownloadedHandler, GeneratingHandler};
pub use passthrough::{CreatedHandler, GeneratedHandler};
pub use uploading::UploadingHandler;

/// What a handler wants the dispatcher to commit.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Transition to `next`, merging `patch` into the state data.
    Advance {
        next: TaskStatus,
        patch: StatePatch,
    },
    /// Record a hand-off and launch a worker with this snapshot. The status
    /// does not change.
    HandOff(WorkerSnapshot),
    /// Nothing to do until a worker finishes.
    Wait,
}

/// A failed stage attempt.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Every item of a non-empty batch failed.
    #[error("all {attempted} items failed during {stage}: {last_error}")]
    Exhausted {
        stage: TaskStatus,
        attempted: usize,
        last_error: String,
    },

    /// The handler did not finish within its budget.
    #[error("{stage} stage timed out after {budget_ms}ms")]
    Timeout { stage: TaskStatus, budget_ms: u128 },

    /// The task can never succeed at this stage; retrying is pointless.
    #[error("invalid task: {message}")]
    Invalid { message: String },

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl HandlerError {
    /// Whether the failure should consume a retry rather than fail the task
    /// outright.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Invalid { .. })
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Work performed for one task status.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The status this handler is registered for.
    fn stage(&self) -> TaskStatus;

    /// Runs one attempt of the stage.
    ///
    /// # Errors
    ///
    /// Any [`HandlerError`]; the dispatcher applies the retry policy.
    async fn process(&self, task: &TaskRecord) -> Result<StageOutcome, HandlerError>;
}

/// Maps each status to its handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskStatus, Arc<dyn StageHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stages: Vec<_> = self.handlers.keys().map(TaskStatus::as_str).collect();
        stages.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("stages", &stages)
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The full pipeline: every non-terminal status gets its handler.
    pub fn standard(blobs: Arc<dyn BlobStore>, config: &PipelineConfig) -> Self {
        Self::new()
            .with(CreatedHandler)
            .with(DownloadingHandler::new(
                Arc::clone(&blobs),
                config.download.clone(),
            ))
            .with(DownloadedHandler)
            .with(GeneratingHandler)
            .with(GeneratedHandler)
            .with(UploadingHandler::new(blobs))
    }

    /// Registers `handler` for its stage, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        if handler.stage().is_terminal() {
            tracing::warn!(stage = %handler.stage(), "ignoring handler for terminal status");
            return;
        }
        self.handlers.insert(handler.stage(), handler);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, handler: impl StageHandler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    /// Returns the handler for `status`, if any.
    pub fn get(&self, status: TaskStatus) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&status).cloned()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

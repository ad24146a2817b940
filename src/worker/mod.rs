//! Worker hand-off.
//!
//! Long-running generation does not run inside the dispatcher. The
//! `downloaded` stage builds a [`WorkerSnapshot`] and the dispatcher launches
//! it through a [`WorkerInvoker`]. The [`GenerationWorker`] claims the task,
//! calls the generation API, commits the result and asks a
//! [`DispatchTrigger`] to resume the state machine.
//!
//! ```text
//! dispatcher(downloaded) --record_handoff--> WorkerInvoker::invoke(snapshot)
//!                                                    |
//!                               GenerationWorker::run(snapshot)
//!                    downloaded -> generating (claim, CAS)
//!                    or claim_handoff(attempt) on a relaunch
//!                    GenerationApi::generate
//!                    generating -> generated (with generated_images)
//!                    DispatchTrigger::trigger(task_id)
//! ```

pub mod generation;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::params::TaskParams;
use crate::types::state_data::DownloadedImage;
use crate::types::status::TaskStatus;

pub use generation::{GenerationWorker, WorkerOutcome};
pub use local::{LocalWorkerInvoker, QueueTrigger};

/// Everything a worker needs, captured at hand-off time.
///
/// Serializable so that an invoker can ship it to a separate process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub task_id: String,
    /// Status the task was in when the worker was launched: `downloaded`
    /// for a first launch, `generating` for a relaunch after a failure.
    pub stage: TaskStatus,
    /// `retry_count` at launch, recorded in the task's hand-off slot.
    pub attempt: u32,
    pub params: TaskParams,
    pub downloaded_images: Vec<DownloadedImage>,
}

/// Launching or triggering failed before any work was done.
#[derive(Debug, thiserror::Error)]
#[error("invocation failed: {0}")]
pub struct InvokeError(pub String);

/// Launches a worker for a snapshot without waiting for it to finish.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    /// # Errors
    ///
    /// [`InvokeError`] if the worker could not be launched.
    async fn invoke(&self, snapshot: WorkerSnapshot) -> Result<(), InvokeError>;
}

/// Requests another dispatcher run for a task.
#[async_trait]
pub trait DispatchTrigger: Send + Sync {
    /// # Errors
    ///
    /// [`InvokeError`] if the request could not be delivered.
    async fn trigger(&self, task_id: &str) -> Result<(), InvokeError>;
}

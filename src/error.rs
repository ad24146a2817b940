//! Error types for task store operations.
//!
//! Provides [`TaskError`], the domain error surfaced by the task store,
//! dispatcher and worker. Stage-level failures are [`HandlerError`]
//! (see [`crate::handler`]) and never leave the dispatcher as anything other
//! than retry bookkeeping or a `failed` status.

use std::fmt;

use crate::types::status::TaskStatus;

/// Errors that can occur during task store operations.
///
/// Each variant carries the task ID and enough context to log the failure.
/// [`is_conflict`](TaskError::is_conflict) identifies the optimistic
/// concurrency failures that a losing invocation swallows.
///
/// # Examples
///
/// ```
/// use photogen_tasks::{TaskError, TaskStatus};
///
/// let err = TaskError::StatusMismatch {
///     task_id: "t1".to_string(),
///     expected: TaskStatus::Downloading,
///     actual: TaskStatus::Downloaded,
/// };
/// assert!(err.is_conflict());
/// assert!(err.to_string().contains("t1"));
/// ```
#[derive(Debug)]
pub enum TaskError {
    /// Attempted a transition that is not an edge of the state machine.
    InvalidTransition {
        /// The task that was being transitioned.
        task_id: String,
        /// The current status of the task.
        from: TaskStatus,
        /// The target status that was rejected.
        to: TaskStatus,
        /// Optional suggestion for the caller.
        suggested_action: Option<String>,
    },

    /// Task with the given ID was not found.
    NotFound {
        /// The task ID that was not found.
        task_id: String,
    },

    /// A task with the generated ID already exists.
    Duplicate {
        /// The colliding task ID.
        task_id: String,
    },

    /// The stored status no longer matches the status the caller read.
    StatusMismatch {
        /// The task ID.
        task_id: String,
        /// Status the caller expected.
        expected: TaskStatus,
        /// Status found in the store.
        actual: TaskStatus,
    },

    /// The stored version changed between read and conditional write.
    ConcurrentModification {
        /// The task ID.
        task_id: String,
        /// Version the caller read.
        expected_version: u64,
        /// Version found at write time.
        actual_version: u64,
    },

    /// A patch targeted a `state_data` slot that is already filled.
    StateDataConflict {
        /// The task ID.
        task_id: String,
        /// Name of the filled slot.
        slot: &'static str,
    },

    /// A patch was committed with a transition it does not belong to.
    PatchMismatch {
        /// The task ID.
        task_id: String,
        /// Name of the slot the patch targets.
        slot: &'static str,
        /// The status being committed.
        status: TaskStatus,
    },

    /// A relaunched worker's hand-off was already claimed, or superseded by
    /// a newer one.
    HandoffTaken {
        /// The task ID.
        task_id: String,
        /// The attempt the worker was launched for.
        attempt: u32,
    },

    /// Submission parameters are not processable.
    InvalidParams {
        /// What is wrong with the params.
        message: String,
    },

    /// Backend storage or serialization error.
    StoreError(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition {
                task_id, from, to, ..
            } => write!(
                f,
                "invalid transition from {from} to {to} for task {task_id}"
            ),
            Self::NotFound { task_id } => write!(f, "task not found: {task_id}"),
            Self::Duplicate { task_id } => write!(f, "task already exists: {task_id}"),
            Self::StatusMismatch {
                task_id,
                expected,
                actual,
            } => write!(
                f,
                "task {task_id} is {actual}, expected {expected}"
            ),
            Self::ConcurrentModification {
                task_id,
                expected_version,
                actual_version,
            } => write!(
                f,
                "concurrent modification of task {task_id}: expected version {expected_version}, found {actual_version}"
            ),
            Self::StateDataConflict { task_id, slot } => {
                write!(f, "state data slot {slot} already set for task {task_id}")
            },
            Self::PatchMismatch {
                task_id,
                slot,
                status,
            } => write!(
                f,
                "state data slot {slot} cannot be written on transition to {status} for task {task_id}"
            ),
            Self::HandoffTaken { task_id, attempt } => write!(
                f,
                "hand-off for attempt {attempt} of task {task_id} is no longer open"
            ),
            Self::InvalidParams { message } => write!(f, "invalid task params: {message}"),
            Self::StoreError(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for TaskError {}

impl TaskError {
    /// Returns `true` for optimistic concurrency failures: another invocation
    /// already moved the task on.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StatusMismatch { .. }
                | Self::ConcurrentModification { .. }
                | Self::HandoffTaken { .. }
        )
    }
}

/// Truncates a failure message to at most `max_chars` characters, on a char
/// boundary, appending an ellipsis when shortened.
pub(crate) fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

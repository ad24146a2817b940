//! Task lifecycle status and the stage state machine.
//!
//! A photo-generation task advances one stage per dispatcher invocation:
//!
//! ```text
//! Created -> Downloading -> Downloaded -> Generating -> Generated -> Uploading -> Completed
//! ```
//!
//! Every non-terminal stage may additionally move to `Failed`. `Completed`
//! and `Failed` are terminal and reject all transitions. Self-transitions are
//! rejected; retry bookkeeping never changes the status.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TaskError;

/// Lifecycle status of a photo-generation task.
///
/// # Examples
///
/// ```
/// use photogen_tasks::TaskStatus;
///
/// let status = TaskStatus::Downloading;
/// assert!(!status.is_terminal());
/// assert!(status.can_transition_to(&TaskStatus::Downloaded));
/// assert!(!status.can_transition_to(&TaskStatus::Uploading));
/// assert!(status.can_transition_to(&TaskStatus::Failed));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been submitted and not yet picked up.
    Created,
    /// Input images are being fetched.
    Downloading,
    /// Input images are available; generation has not started.
    Downloaded,
    /// A worker has claimed the task and is calling the generation API.
    Generating,
    /// Generated artifacts are recorded; upload has not started.
    Generated,
    /// Generated artifacts are being persisted to durable storage.
    Uploading,
    /// All artifacts are uploaded (terminal).
    Completed,
    /// Task was abandoned after an unrecoverable error (terminal).
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TaskStatus {
    /// Every status, in pipeline order with `Failed` last.
    pub const ALL: [TaskStatus; 8] = [
        Self::Created,
        Self::Downloading,
        Self::Downloaded,
        Self::Generating,
        Self::Generated,
        Self::Uploading,
        Self::Completed,
        Self::Failed,
    ];

    /// Returns the wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` if this status is terminal (no further transitions allowed).
    ///
    /// # Examples
    ///
    /// ```
    /// use photogen_tasks::TaskStatus;
    ///
    /// assert!(TaskStatus::Completed.is_terminal());
    /// assert!(TaskStatus::Failed.is_terminal());
    /// assert!(!TaskStatus::Generating.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the forward successor of this status, if any.
    ///
    /// Terminal states have no successor.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Downloading),
            Self::Downloading => Some(Self::Downloaded),
            Self::Downloaded => Some(Self::Generating),
            Self::Generating => Some(Self::Generated),
            Self::Generated => Some(Self::Uploading),
            Self::Uploading => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Returns `true` if transitioning from this status to `next` is a
    /// protocol edge: the forward successor, or `Failed` from any
    /// non-terminal state.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        *next == Self::Failed || self.successor() == Some(*next)
    }

    /// Validates a transition from this status to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidTransition`] when `next` is not an edge
    /// out of this status.
    ///
    /// # Examples
    ///
    /// ```
    /// use photogen_tasks::TaskStatus;
    ///
    /// assert!(TaskStatus::Created
    ///     .validate_transition("task-1", &TaskStatus::Downloading)
    ///     .is_ok());
    /// assert!(TaskStatus::Created
    ///     .validate_transition("task-1", &TaskStatus::Completed)
    ///     .is_err());
    /// ```
    pub fn validate_transition(&self, task_id: &str, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        let suggested_action = if self.is_terminal() {
            Some("task is in a terminal state and cannot be transitioned".to_string())
        } else if self == next {
            Some(format!("task is already in {self} state"))
        } else {
            self.successor()
                .map(|expected| format!("the only forward edge from {self} is {expected}"))
        };

        Err(TaskError::InvalidTransition {
            task_id: task_id.to_string(),
            from: *self,
            to: *next,
            suggested_action,
        })
    }
}

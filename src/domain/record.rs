//! Task record -- the store's representation of a photo-generation task.
//!
//! [`TaskRecord`] is serialized as camelCase JSON at the storage boundary.
//! The `version` field is not part of the serialized document: backends keep
//! it alongside the bytes and the store copies it onto the record after each
//! read or write.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::params::TaskParams;
use crate::types::state_data::StateData;
use crate::types::status::TaskStatus;

/// Returns the current UTC time in the timestamp format used by records.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Stored representation of a task.
///
/// # Construction
///
/// Use [`TaskRecord::new`] to create a record in the `created` state with a
/// generated UUID:
///
/// ```
/// use photogen_tasks::{TaskParams, TaskRecord, TaskStatus};
///
/// let record = TaskRecord::new(TaskParams::new([]));
/// assert_eq!(record.status, TaskStatus::Created);
/// assert_eq!(record.retry_count, 0);
/// assert!(record.error.is_none());
/// assert_eq!(record.id.len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique task identifier (UUIDv4).
    pub id: String,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Submission parameters, immutable after creation.
    pub params: TaskParams,

    /// Data accumulated by completed stages.
    #[serde(default)]
    pub state_data: StateData,

    /// Number of failed attempts at the current stage.
    #[serde(default)]
    pub retry_count: u32,

    /// Human-readable failure reason, set when the task fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// RFC 3339 creation timestamp.
    pub created_at: String,

    /// RFC 3339 timestamp of the last committed change.
    pub updated_at: String,

    /// Optimistic-lock token assigned by the backend. Starts at 1.
    #[serde(skip)]
    pub version: u64,
}

impl TaskRecord {
    /// Creates a new record in the `created` state.
    pub fn new(params: TaskParams) -> Self {
        let now = now_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Created,
            params,
            state_data: StateData::default(),
            retry_count: 0,
            error: None,
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        }
    }

    /// Returns `true` once the task has reached `completed` or `failed`.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Refreshes `updated_at` to the current time.
    pub(crate) fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}

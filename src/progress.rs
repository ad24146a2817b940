//! Read-only progress query.

use serde::{Deserialize, Serialize};

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::store::TaskStore;
use crate::types::status::TaskStatus;

/// Client-facing view of a task's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
    /// 0 to 100. A failed task reports 0.
    pub percentage: u8,
}

impl Progress {
    /// Derives progress from a record.
    ///
    /// # Examples
    ///
    /// ```
    /// use photogen_tasks::progress::Progress;
    /// use photogen_tasks::{TaskParams, TaskRecord, TaskStatus};
    ///
    /// let mut record = TaskRecord::new(TaskParams::new([]));
    /// record.status = TaskStatus::Generating;
    /// let progress = Progress::from_record(&record);
    /// assert_eq!(progress.percentage, 50);
    /// ```
    pub fn from_record(record: &TaskRecord) -> Self {
        let (message, percentage) = match record.status {
            TaskStatus::Created => ("Task created".to_string(), 0),
            TaskStatus::Downloading => ("Downloading input images".to_string(), 10),
            TaskStatus::Downloaded => ("Input images downloaded".to_string(), 30),
            TaskStatus::Generating => ("Generating images".to_string(), 50),
            TaskStatus::Generated => ("Images generated".to_string(), 70),
            TaskStatus::Uploading => ("Uploading results".to_string(), 85),
            TaskStatus::Completed => ("Completed".to_string(), 100),
            TaskStatus::Failed => (
                record
                    .error
                    .clone()
                    .unwrap_or_else(|| "Task failed".to_string()),
                0,
            ),
        };
        Self {
            task_id: record.id.clone(),
            status: record.status,
            message,
            percentage,
        }
    }
}

/// Loads a task and reports its progress. Never writes.
///
/// # Errors
///
/// [`TaskError::NotFound`] if the task does not exist.
pub async fn progress(store: &dyn TaskStore, task_id: &str) -> Result<Progress, TaskError> {
    let record = store.get(task_id).await?;
    Ok(Progress::from_record(&record))
}

//! Generic task store with all domain logic delegating to a [`StorageBackend`].
//!
//! [`GenericTaskStore`] implements every domain operation (status checks,
//! state machine edges, write-once state data, retry bookkeeping, CAS-based
//! mutations, JSON serialization) on top of any [`StorageBackend`].
//!
//! # CAS Semantics
//!
//! Each mutation reads the record, checks the caller's expected status,
//! applies the change to the in-memory copy, and writes it back with
//! [`StorageBackend::put_if_version`]. A status mismatch surfaces as
//! [`TaskError::StatusMismatch`]; a version race between read and write
//! surfaces as [`TaskError::ConcurrentModification`]. Neither writes.

use async_trait::async_trait;

use crate::constants::MAX_ERROR_LEN;
use crate::domain::record::{now_rfc3339, TaskRecord};
use crate::error::{truncate_message, TaskError};
use crate::store::backend::{StorageBackend, StorageError};
use crate::store::{FailureOutcome, TaskStore};
use crate::types::params::TaskParams;
use crate::types::state_data::{Handoff, StatePatch};
use crate::types::status::TaskStatus;

/// Generic task store that delegates all storage to a [`StorageBackend`].
///
/// # Type Parameters
///
/// * `B` - A [`StorageBackend`] implementation.
#[derive(Debug)]
pub struct GenericTaskStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> GenericTaskStore<B> {
    /// Creates a new generic task store backed by the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ---- Serialization helpers (private) ----

    fn serialize_record(record: &TaskRecord) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(record)
            .map_err(|e| TaskError::StoreError(format!("failed to serialize TaskRecord: {e}")))
    }

    fn deserialize_record(data: &[u8]) -> Result<TaskRecord, TaskError> {
        serde_json::from_slice(data)
            .map_err(|e| TaskError::StoreError(format!("failed to deserialize TaskRecord: {e}")))
    }

    fn map_storage_error(err: StorageError, task_id: &str) -> TaskError {
        match err {
            StorageError::Missing { .. } => TaskError::NotFound {
                task_id: task_id.to_string(),
            },
            StorageError::Exists { .. } => TaskError::Duplicate {
                task_id: task_id.to_string(),
            },
            StorageError::Stale {
                expected, found, ..
            } => TaskError::ConcurrentModification {
                task_id: task_id.to_string(),
                expected_version: expected,
                actual_version: found,
            },
            StorageError::Unavailable(message) => TaskError::StoreError(message),
        }
    }

    /// Reads a record and verifies it is still in `expected_status`.
    async fn load_expecting(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
    ) -> Result<TaskRecord, TaskError> {
        let record = self.load(task_id).await?;
        if record.status != expected_status {
            tracing::debug!(
                task_id = task_id,
                expected = %expected_status,
                actual = %record.status,
                "status mismatch on conditional update"
            );
            return Err(TaskError::StatusMismatch {
                task_id: task_id.to_string(),
                expected: expected_status,
                actual: record.status,
            });
        }
        Ok(record)
    }

    async fn load(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        let versioned = self
            .backend
            .get(task_id)
            .await
            .map_err(|e| Self::map_storage_error(e, task_id))?;
        let mut record = Self::deserialize_record(&versioned.data)?;
        record.version = versioned.version;
        Ok(record)
    }

    /// CAS-writes a mutated record against the version it was read at.
    async fn write_back(&self, mut record: TaskRecord) -> Result<TaskRecord, TaskError> {
        let bytes = Self::serialize_record(&record)?;
        let new_version = self
            .backend
            .put_if_version(&record.id, &bytes, record.version)
            .await
            .map_err(|e| Self::map_storage_error(e, &record.id))?;
        record.version = new_version;
        Ok(record)
    }

    /// Rejects bookkeeping writes against `completed` or `failed` tasks.
    fn ensure_active(record: &TaskRecord) -> Result<(), TaskError> {
        if !record.status.is_terminal() {
            return Ok(());
        }
        Err(TaskError::InvalidTransition {
            task_id: record.id.clone(),
            from: record.status,
            to: record.status,
            suggested_action: Some(
                "task is in a terminal state and cannot be transitioned".to_string(),
            ),
        })
    }

    fn mark_failed(record: &mut TaskRecord, error: &str) -> Result<(), TaskError> {
        record
            .status
            .validate_transition(&record.id, &TaskStatus::Failed)?;
        record.status = TaskStatus::Failed;
        record.error = Some(truncate_message(error, MAX_ERROR_LEN));
        record.touch();
        Ok(())
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> TaskStore for GenericTaskStore<B> {
    async fn create(&self, params: TaskParams) -> Result<TaskRecord, TaskError> {
        params.validate()?;

        let mut record = TaskRecord::new(params);
        let bytes = Self::serialize_record(&record)?;
        let version = self
            .backend
            .put_if_absent(&record.id, &bytes)
            .await
            .map_err(|e| Self::map_storage_error(e, &record.id))?;
        record.version = version;

        tracing::info!(
            task_id = %record.id,
            images = record.params.images.len(),
            count = record.params.count,
            "task created"
        );
        Ok(record)
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.load(task_id).await
    }

    async fn commit_transition(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        new_status: TaskStatus,
        patch: StatePatch,
    ) -> Result<TaskRecord, TaskError> {
        let mut record = self.load_expecting(task_id, expected_status).await?;

        record.status.validate_transition(task_id, &new_status)?;
        record.state_data.apply(task_id, new_status, patch)?;

        record.status = new_status;
        record.retry_count = 0;
        record.touch();

        let record = self.write_back(record).await?;
        tracing::info!(
            task_id = task_id,
            from = %expected_status,
            to = %new_status,
            version = record.version,
            "task transitioned"
        );
        Ok(record)
    }

    async fn record_handoff(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        expected_version: u64,
    ) -> Result<TaskRecord, TaskError> {
        let mut record = self.load_expecting(task_id, expected_status).await?;
        Self::ensure_active(&record)?;
        if record.version != expected_version {
            return Err(TaskError::ConcurrentModification {
                task_id: task_id.to_string(),
                expected_version,
                actual_version: record.version,
            });
        }

        let dispatch_count = record
            .state_data
            .handoff
            .as_ref()
            .map_or(1, |h| h.dispatch_count + 1);
        record.state_data.handoff = Some(Handoff {
            stage: expected_status,
            dispatched_at: now_rfc3339(),
            dispatch_count,
            attempt: record.retry_count,
            claimed: false,
        });
        record.touch();

        let record = self.write_back(record).await?;
        tracing::debug!(
            task_id = task_id,
            stage = %expected_status,
            dispatch_count = dispatch_count,
            version = record.version,
            "worker hand-off recorded"
        );
        Ok(record)
    }

    async fn claim_handoff(&self, task_id: &str, attempt: u32) -> Result<TaskRecord, TaskError> {
        let mut record = self.load_expecting(task_id, TaskStatus::Generating).await?;

        let open = record.retry_count == attempt
            && record.state_data.handoff.as_ref().is_some_and(|h| {
                h.stage == TaskStatus::Generating && h.attempt == attempt && !h.claimed
            });
        let Some(handoff) = record.state_data.handoff.as_mut().filter(|_| open) else {
            return Err(TaskError::HandoffTaken {
                task_id: task_id.to_string(),
                attempt,
            });
        };
        handoff.claimed = true;
        record.touch();

        let record = self.write_back(record).await?;
        tracing::debug!(task_id = task_id, attempt = attempt, "relaunched hand-off claimed");
        Ok(record)
    }

    async fn record_failure(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, TaskError> {
        let mut record = self.load_expecting(task_id, expected_status).await?;
        Self::ensure_active(&record)?;

        record.retry_count = record.retry_count.saturating_add(1);
        let attempt = record.retry_count;

        if attempt >= max_retries {
            Self::mark_failed(&mut record, error)?;
            let record = self.write_back(record).await?;
            tracing::warn!(
                task_id = task_id,
                stage = %expected_status,
                attempt = attempt,
                "retry budget exhausted, task failed"
            );
            return Ok(FailureOutcome::Exhausted { record });
        }

        record.touch();
        let record = self.write_back(record).await?;
        tracing::info!(
            task_id = task_id,
            stage = %expected_status,
            attempt = attempt,
            max_retries = max_retries,
            "stage attempt failed, awaiting retry"
        );
        Ok(FailureOutcome::Retry { record, attempt })
    }

    async fn fail(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
    ) -> Result<TaskRecord, TaskError> {
        let mut record = self.load_expecting(task_id, expected_status).await?;
        Self::mark_failed(&mut record, error)?;
        let record = self.write_back(record).await?;
        tracing::warn!(task_id = task_id, stage = %expected_status, "task failed");
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, TaskError> {
        let entries = self
            .backend
            .list()
            .await
            .map_err(|e| Self::map_storage_error(e, ""))?;

        let mut records = Vec::with_capacity(entries.len());
        for (_, versioned) in entries {
            let mut record = Self::deserialize_record(&versioned.data)?;
            record.version = versioned.version;
            records.push(record);
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}

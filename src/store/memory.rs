//! In-memory storage for tests and single-process runs.
//!
//! [`InMemoryBackend`] keeps serialized records in a [`DashMap`];
//! [`InMemoryTaskStore`] puts the generic store's domain rules on top of it.
//! Nothing survives the process.
//!
//! # Examples
//!
//! ```
//! use photogen_tasks::store::memory::InMemoryTaskStore;
//! use photogen_tasks::store::TaskStore;
//! use photogen_tasks::{TaskParams, TaskStatus};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = InMemoryTaskStore::new();
//! let record = store.create(TaskParams::new([])).await.unwrap();
//! assert_eq!(record.status, TaskStatus::Created);
//! # });
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};
use crate::store::generic::GenericTaskStore;
use crate::store::{FailureOutcome, TaskStore};
use crate::types::params::TaskParams;
use crate::types::state_data::StatePatch;
use crate::types::status::TaskStatus;

/// [`StorageBackend`] over a [`DashMap`] of task ID to [`VersionedRecord`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: DashMap<String, VersionedRecord>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        self.records
            .get(key)
            .map(|stored| stored.value().clone())
            .ok_or_else(|| StorageError::Missing {
                key: key.to_string(),
            })
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let Entry::Vacant(slot) = self.records.entry(key.to_string()) else {
            return Err(StorageError::Exists {
                key: key.to_string(),
            });
        };
        slot.insert(VersionedRecord {
            data: data.to_vec(),
            version: 1,
        });
        Ok(1)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        // The shard lock is held from the version check through the write.
        let Some(mut stored) = self.records.get_mut(key) else {
            return Err(StorageError::Missing {
                key: key.to_string(),
            });
        };
        if stored.version != expected_version {
            return Err(StorageError::Stale {
                key: key.to_string(),
                expected: expected_version,
                found: stored.version,
            });
        }
        stored.data = data.to_vec();
        stored.version += 1;
        Ok(stored.version)
    }

    async fn list(&self) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        Ok(self
            .records
            .iter()
            .map(|stored| (stored.key().clone(), stored.value().clone()))
            .collect())
    }
}

/// [`GenericTaskStore`] over an [`InMemoryBackend`].
#[derive(Debug)]
pub struct InMemoryTaskStore {
    inner: GenericTaskStore<InMemoryBackend>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: GenericTaskStore::new(InMemoryBackend::new()),
        }
    }

    /// The raw backend, for inspecting stored JSON and versions.
    pub fn backend(&self) -> &InMemoryBackend {
        self.inner.backend()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, params: TaskParams) -> Result<TaskRecord, TaskError> {
        self.inner.create(params).await
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.inner.get(task_id).await
    }

    async fn commit_transition(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        new_status: TaskStatus,
        patch: StatePatch,
    ) -> Result<TaskRecord, TaskError> {
        self.inner
            .commit_transition(task_id, expected_status, new_status, patch)
            .await
    }

    async fn record_handoff(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        expected_version: u64,
    ) -> Result<TaskRecord, TaskError> {
        self.inner
            .record_handoff(task_id, expected_status, expected_version)
            .await
    }

    async fn claim_handoff(&self, task_id: &str, attempt: u32) -> Result<TaskRecord, TaskError> {
        self.inner.claim_handoff(task_id, attempt).await
    }

    async fn record_failure(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, TaskError> {
        self.inner
            .record_failure(task_id, expected_status, error, max_retries)
            .await
    }

    async fn fail(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
    ) -> Result<TaskRecord, TaskError> {
        self.inner.fail(task_id, expected_status, error).await
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, TaskError> {
        self.inner.list().await
    }
}

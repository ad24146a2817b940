//! Versioned key-value storage underneath the task store.
//!
//! A backend stores one opaque JSON blob per task ID together with a
//! version counter. It knows nothing about statuses, stage data or retries;
//! [`GenericTaskStore`](crate::store::generic::GenericTaskStore) owns all of
//! that and only ever writes through [`StorageBackend::put_if_version`].
//!
//! Versions start at 1 on insert and increase by one on every accepted
//! write, so two writers that read the same version cannot both succeed.

use async_trait::async_trait;

/// Raw task bytes as stored, with the version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// Serialized [`TaskRecord`](crate::domain::TaskRecord) JSON.
    pub data: Vec<u8>,
    pub version: u64,
}

/// A storage operation that could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no record stored under {key}")]
    Missing { key: String },

    /// Insert collided with an existing key.
    #[error("a record is already stored under {key}")]
    Exists { key: String },

    /// Conditional write lost a race: the record moved on since it was read.
    #[error("stale write to {key}: read at version {expected}, now at {found}")]
    Stale {
        key: String,
        expected: u64,
        found: u64,
    },

    /// The storage engine itself failed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Versioned KV contract a task store runs on.
///
/// Every call may race with calls from other dispatcher or worker
/// invocations; implementations make each call atomic on its key.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// # Errors
    ///
    /// [`StorageError::Missing`] if nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Inserts at version 1.
    ///
    /// # Errors
    ///
    /// [`StorageError::Exists`] if the key is taken.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Replaces the record only if it is still at `expected_version`, and
    /// returns the new version.
    ///
    /// # Errors
    ///
    /// [`StorageError::Missing`], or [`StorageError::Stale`] with nothing
    /// written.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Every stored record, unordered.
    ///
    /// # Errors
    ///
    /// [`StorageError::Unavailable`] if the engine cannot be read.
    async fn list(&self) -> Result<Vec<(String, VersionedRecord)>, StorageError>;
}

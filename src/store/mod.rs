//! Task store trait, generic implementation, and supporting types.
//!
//! # Architecture
//!
//! The task storage system has three layers:
//!
//! 1. **[`TaskStore`]** -- the object-safe interface used as
//!    `Arc<dyn TaskStore>` by the dispatcher, handlers and workers.
//!
//! 2. **[`GenericTaskStore<B>`](generic::GenericTaskStore)** -- all domain
//!    logic: status checks, edge validation, write-once state data merge,
//!    retry bookkeeping, CAS-based mutations and JSON serialization.
//!
//! 3. **[`StorageBackend`]** -- dumb versioned KV trait that backends
//!    implement. No domain logic.
//!
//! Every mutation is a read followed by a compare-and-swap on the record
//! version, so two invocations racing on the same task produce exactly one
//! committed change; the loser sees a conflict
//! ([`TaskError::is_conflict`]) and the stored record is untouched.
//!
//! # Backends
//!
//! - [`InMemoryBackend`](crate::store::memory::InMemoryBackend) -- `DashMap`
//!   backend used by [`InMemoryTaskStore`](crate::store::memory::InMemoryTaskStore).

pub mod backend;
pub mod generic;
pub mod memory;

use async_trait::async_trait;

pub use backend::{StorageBackend, StorageError, VersionedRecord};

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::types::params::TaskParams;
use crate::types::state_data::StatePatch;
use crate::types::status::TaskStatus;

/// Result of recording a failed stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// The task stays in its current status awaiting a re-trigger.
    Retry {
        /// The updated task record.
        record: TaskRecord,
        /// How many attempts have failed so far at this stage.
        attempt: u32,
    },
    /// The retry budget is spent; the task is now `failed`.
    Exhausted {
        /// The updated task record.
        record: TaskRecord,
    },
}

impl FailureOutcome {
    /// Returns the record as committed.
    pub fn record(&self) -> &TaskRecord {
        match self {
            Self::Retry { record, .. } | Self::Exhausted { record } => record,
        }
    }
}

/// Object-safe interface for task storage.
///
/// Implemented by [`GenericTaskStore<B>`](generic::GenericTaskStore) for
/// every backend. Every mutation takes the status the caller observed and
/// fails with a conflict if the task has moved on since.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new task in the `created` state.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidParams`] if the params fail validation.
    /// - [`TaskError::Duplicate`] if the generated ID collides.
    async fn create(&self, params: TaskParams) -> Result<TaskRecord, TaskError>;

    /// Retrieves a task by ID.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if no such task exists.
    async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError>;

    /// Atomically moves a task from `expected_status` to `new_status`,
    /// merging `patch` into its state data.
    ///
    /// On success `retry_count` is reset for the new stage, `updated_at` is
    /// refreshed and the version is bumped.
    ///
    /// # Errors
    ///
    /// - [`TaskError::StatusMismatch`] / [`TaskError::ConcurrentModification`]
    ///   if another invocation already changed the task. Nothing is written.
    /// - [`TaskError::InvalidTransition`] if the edge is not in the state machine.
    /// - [`TaskError::StateDataConflict`] / [`TaskError::PatchMismatch`] if
    ///   the patch would overwrite or misplace stage output.
    async fn commit_transition(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        new_status: TaskStatus,
        patch: StatePatch,
    ) -> Result<TaskRecord, TaskError>;

    /// Records that a worker was launched for the task's current stage,
    /// without changing its status.
    ///
    /// The write only lands if the task is still at `expected_version`, so
    /// of two dispatchers that read the same record only one may launch.
    ///
    /// # Errors
    ///
    /// - Conflict errors as for [`commit_transition`](Self::commit_transition),
    ///   including [`TaskError::ConcurrentModification`] when the record
    ///   moved past `expected_version`.
    /// - [`TaskError::InvalidTransition`] if the task is terminal.
    async fn record_handoff(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        expected_version: u64,
    ) -> Result<TaskRecord, TaskError>;

    /// Marks the `generating` hand-off recorded for `attempt` as taken by a
    /// relaunched worker. Succeeds at most once per hand-off.
    ///
    /// # Errors
    ///
    /// - [`TaskError::HandoffTaken`] if no open relaunch exists for `attempt`.
    /// - Conflict errors as for [`commit_transition`](Self::commit_transition).
    async fn claim_handoff(&self, task_id: &str, attempt: u32) -> Result<TaskRecord, TaskError>;

    /// Records a failed attempt at the current stage.
    ///
    /// Increments `retry_count`; once it reaches `max_retries` the task moves
    /// to `failed` carrying `error`.
    ///
    /// # Errors
    ///
    /// Conflict errors as for [`commit_transition`](Self::commit_transition);
    /// [`TaskError::InvalidTransition`] if the task is already terminal.
    async fn record_failure(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, TaskError>;

    /// Moves a task straight to `failed`, bypassing the retry budget.
    ///
    /// # Errors
    ///
    /// Conflict errors as for [`commit_transition`](Self::commit_transition);
    /// [`TaskError::InvalidTransition`] if the task is already terminal.
    async fn fail(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
    ) -> Result<TaskRecord, TaskError>;

    /// Lists every task, most recently updated first.
    ///
    /// # Errors
    ///
    /// - [`TaskError::StoreError`] on backend or deserialization failures.
    async fn list(&self) -> Result<Vec<TaskRecord>, TaskError>;
}

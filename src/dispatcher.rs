//! Single-step state machine driver.
//!
//! [`Dispatcher::dispatch`] loads a task, runs the handler for its current
//! status within that status's time budget, and commits the outcome with a
//! compare-and-swap. It performs at most one step per call and never
//! schedules itself; whoever triggers it decides when to call again.
//!
//! Losing a race is not an error: if another invocation committed first the
//! dispatcher reports [`DispatchOutcome::Superseded`] and writes nothing.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{PipelineConfig, RetryPolicy, StageBudgets};
use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::handler::{HandlerError, HandlerRegistry, StageOutcome};
use crate::store::{FailureOutcome, TaskStore};
use crate::types::status::TaskStatus;
use crate::worker::{WorkerInvoker, WorkerSnapshot};

/// Result of one [`Dispatcher::dispatch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The task was already terminal.
    Finished { status: TaskStatus },
    /// Nothing to do until a worker finishes.
    AwaitingWorker { status: TaskStatus },
    /// The task moved forward one edge.
    Advanced { from: TaskStatus, to: TaskStatus },
    /// A worker was launched; the status is unchanged.
    HandedOff {
        stage: TaskStatus,
        dispatch_count: u32,
    },
    /// Another invocation changed the task first. Nothing was written.
    Superseded,
    /// The attempt failed and the task awaits a re-trigger.
    RetryScheduled { attempt: u32, retry_after: Duration },
    /// The task is now `failed`.
    Failed { error: String },
}

/// Runs stage handlers against the task store.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    registry: HandlerRegistry,
    invoker: Arc<dyn WorkerInvoker>,
    retry: RetryPolicy,
    budgets: StageBudgets,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .field("budgets", &self.budgets)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: HandlerRegistry,
        invoker: Arc<dyn WorkerInvoker>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            invoker,
            retry: config.retry.clone(),
            budgets: config.budgets.clone(),
        }
    }

    /// The store this dispatcher commits to.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Advances `task_id` by at most one step.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task does not exist.
    /// - Store failures other than conflicts, and commits a handler produced
    ///   that the state machine rejects.
    pub async fn dispatch(&self, task_id: &str) -> Result<DispatchOutcome, TaskError> {
        let record = self.store.get(task_id).await?;
        let status = record.status;

        if status.is_terminal() {
            return Ok(DispatchOutcome::Finished { status });
        }
        let Some(handler) = self.registry.get(status) else {
            tracing::debug!(task_id = task_id, status = %status, "no handler for status");
            return Ok(DispatchOutcome::AwaitingWorker { status });
        };

        let budget = self.budgets.for_stage(status);
        let result = match tokio::time::timeout(budget, handler.process(&record)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout {
                stage: status,
                budget_ms: budget.as_millis(),
            }),
        };

        match result {
            Ok(StageOutcome::Advance { next, patch }) => {
                let committed = self
                    .store
                    .commit_transition(task_id, status, next, patch)
                    .await;
                Self::swallow_conflict(task_id, committed, |_| DispatchOutcome::Advanced {
                    from: status,
                    to: next,
                })
            },
            Ok(StageOutcome::HandOff(snapshot)) => self.hand_off(&record, snapshot).await,
            Ok(StageOutcome::Wait) => Ok(DispatchOutcome::AwaitingWorker { status }),
            Err(err) => self.handle_failure(&record, &err).await,
        }
    }

    async fn hand_off(
        &self,
        record: &TaskRecord,
        mut snapshot: WorkerSnapshot,
    ) -> Result<DispatchOutcome, TaskError> {
        let committed = match self
            .store
            .record_handoff(&record.id, record.status, record.version)
            .await
        {
            Ok(committed) => committed,
            Err(e) if e.is_conflict() => return Ok(Self::superseded(&record.id, &e)),
            Err(e) => return Err(e),
        };
        let Some(handoff) = committed.state_data.handoff.clone() else {
            return Err(TaskError::StoreError(format!(
                "hand-off for task {} was not recorded",
                record.id
            )));
        };
        snapshot.attempt = handoff.attempt;

        if let Err(e) = self.invoker.invoke(snapshot).await {
            tracing::warn!(task_id = %record.id, error = %e, "worker launch failed");
            return self.handle_failure(&committed, &HandlerError::from(e)).await;
        }

        tracing::info!(
            task_id = %record.id,
            stage = %record.status,
            dispatch_count = handoff.dispatch_count,
            "generation worker launched"
        );
        Ok(DispatchOutcome::HandedOff {
            stage: record.status,
            dispatch_count: handoff.dispatch_count,
        })
    }

    async fn handle_failure(
        &self,
        record: &TaskRecord,
        err: &HandlerError,
    ) -> Result<DispatchOutcome, TaskError> {
        let message = err.to_string();
        tracing::warn!(
            task_id = %record.id,
            stage = %record.status,
            error = %message,
            retryable = err.is_retryable(),
            "stage attempt failed"
        );

        if !err.is_retryable() {
            let failed = self.store.fail(&record.id, record.status, &message).await;
            return Self::swallow_conflict(&record.id, failed, |r| DispatchOutcome::Failed {
                error: r.error.unwrap_or_default(),
            });
        }

        let outcome = self
            .store
            .record_failure(&record.id, record.status, &message, self.retry.max_retries)
            .await;
        Self::swallow_conflict(&record.id, outcome, |outcome| match outcome {
            FailureOutcome::Retry { attempt, .. } => DispatchOutcome::RetryScheduled {
                attempt,
                retry_after: self.retry.backoff(attempt),
            },
            FailureOutcome::Exhausted { record } => DispatchOutcome::Failed {
                error: record.error.unwrap_or_default(),
            },
        })
    }

    fn swallow_conflict<T>(
        task_id: &str,
        result: Result<T, TaskError>,
        on_success: impl FnOnce(T) -> DispatchOutcome,
    ) -> Result<DispatchOutcome, TaskError> {
        match result {
            Ok(value) => Ok(on_success(value)),
            Err(e) if e.is_conflict() => Ok(Self::superseded(task_id, &e)),
            Err(e) => {
                tracing::error!(task_id = task_id, error = %e, "commit rejected");
                Err(e)
            },
        }
    }

    fn superseded(task_id: &str, err: &TaskError) -> DispatchOutcome {
        tracing::info!(task_id = task_id, reason = %err, "superseded by a concurrent invocation");
        DispatchOutcome::Superseded
    }
}

//! The generation worker.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::{DispatchTrigger, WorkerSnapshot};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::TaskError;
use crate::generation::{GeneratedArtifact, GenerationApi, GenerationError};
use crate::store::{FailureOutcome, TaskStore};
use crate::types::state_data::{GeneratedImage, StatePatch};
use crate::types::status::TaskStatus;

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Images were generated and the task is now `generated`.
    Generated { artifacts: usize },
    /// Another worker owns the task, or the snapshot is stale. Nothing was
    /// written.
    Superseded,
    /// Generation failed; the task stays `generating` awaiting a relaunch.
    RetryPending { attempt: u32 },
    /// Generation failed for the last time; the task is `failed`.
    Failed { error: String },
}

/// Runs the `generating` stage for one snapshot.
pub struct GenerationWorker {
    store: Arc<dyn TaskStore>,
    api: Arc<dyn GenerationApi>,
    trigger: Arc<dyn DispatchTrigger>,
    retry: RetryPolicy,
    budget: Duration,
}

impl GenerationWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        api: Arc<dyn GenerationApi>,
        trigger: Arc<dyn DispatchTrigger>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            api,
            trigger,
            retry: config.retry.clone(),
            budget: config.budgets.worker(),
        }
    }

    /// Claims the task, generates images and commits them.
    ///
    /// Unless the run was superseded, the [`DispatchTrigger`] is asked to
    /// resume the state machine afterwards.
    ///
    /// # Errors
    ///
    /// Store failures other than conflicts.
    pub async fn run(&self, snapshot: WorkerSnapshot) -> Result<WorkerOutcome, TaskError> {
        let task_id = snapshot.task_id.as_str();
        if !self.claim(&snapshot).await? {
            tracing::info!(task_id = task_id, "task already claimed, worker exiting");
            return Ok(WorkerOutcome::Superseded);
        }

        let params = &snapshot.params;
        let generation = tokio::time::timeout(
            self.budget,
            self.api.generate(
                &snapshot.downloaded_images,
                &params.generation_params,
                params.count,
            ),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GenerationError::Transport(format!(
                "worker exceeded its {}ms budget",
                self.budget.as_millis()
            )))
        });

        let outcome = match generation {
            Ok(artifacts) => self.commit(task_id, artifacts).await?,
            Err(e) => self.record_failure(task_id, &e).await?,
        };

        if outcome != WorkerOutcome::Superseded {
            if let Err(e) = self.trigger.trigger(task_id).await {
                tracing::warn!(task_id = task_id, error = %e, "dispatch trigger failed");
            }
        }
        Ok(outcome)
    }

    /// Takes ownership of the task for this run.
    ///
    /// A first launch moves `downloaded -> generating`; losing that race
    /// means another worker owns the task. A relaunch takes the open
    /// hand-off recorded for this snapshot's attempt, once.
    async fn claim(&self, snapshot: &WorkerSnapshot) -> Result<bool, TaskError> {
        match snapshot.stage {
            TaskStatus::Downloaded => {
                match self
                    .store
                    .commit_transition(
                        &snapshot.task_id,
                        TaskStatus::Downloaded,
                        TaskStatus::Generating,
                        StatePatch::Empty,
                    )
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_conflict() => Ok(false),
                    Err(e) => Err(e),
                }
            },
            TaskStatus::Generating => {
                match self
                    .store
                    .claim_handoff(&snapshot.task_id, snapshot.attempt)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_conflict() => Ok(false),
                    Err(e) => Err(e),
                }
            },
            other => {
                tracing::warn!(
                    task_id = %snapshot.task_id,
                    stage = %other,
                    "snapshot taken at a stage the worker does not handle"
                );
                Ok(false)
            },
        }
    }

    async fn commit(
        &self,
        task_id: &str,
        artifacts: Vec<GeneratedArtifact>,
    ) -> Result<WorkerOutcome, TaskError> {
        let images: Vec<GeneratedImage> = artifacts
            .into_iter()
            .map(|artifact| GeneratedImage {
                artifact_id: Uuid::new_v4().to_string(),
                base64_data: artifact.base64_data,
                mime_type: artifact.mime_type,
            })
            .collect();
        let count = images.len();

        match self
            .store
            .commit_transition(
                task_id,
                TaskStatus::Generating,
                TaskStatus::Generated,
                StatePatch::Generated(images),
            )
            .await
        {
            Ok(_) => {
                tracing::info!(task_id = task_id, artifacts = count, "images generated");
                Ok(WorkerOutcome::Generated { artifacts: count })
            },
            Err(e) if e.is_conflict() => Ok(WorkerOutcome::Superseded),
            Err(e) => Err(e),
        }
    }

    async fn record_failure(
        &self,
        task_id: &str,
        err: &GenerationError,
    ) -> Result<WorkerOutcome, TaskError> {
        let message = err.to_string();
        tracing::warn!(task_id = task_id, error = %message, "generation failed");
        match self
            .store
            .record_failure(
                task_id,
                TaskStatus::Generating,
                &message,
                self.retry.max_retries,
            )
            .await
        {
            Ok(FailureOutcome::Retry { attempt, .. }) => Ok(WorkerOutcome::RetryPending { attempt }),
            Ok(FailureOutcome::Exhausted { record }) => Ok(WorkerOutcome::Failed {
                error: record.error.unwrap_or_default(),
            }),
            Err(e) if e.is_conflict() => Ok(WorkerOutcome::Superseded),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for GenerationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationWorker")
            .field("retry", &self.retry)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

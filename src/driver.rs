//! In-process trigger loop.
//!
//! The dispatcher only ever takes one step. [`Driver`] is the trigger used
//! by the CLI and end-to-end tests: it keeps dispatching a task, sleeps on
//! retry hints, and waits on the [`QueueTrigger`](crate::worker::QueueTrigger)
//! queue while a worker owns the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::progress::Progress;

/// Errors that stop a [`Driver`] before the task is terminal.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error(transparent)]
    Task(#[from] TaskError),

    /// No worker reported back within the wait budget.
    #[error("no trigger for task {task_id} within {waited_ms}ms")]
    WorkerSilent { task_id: String, waited_ms: u128 },

    /// Every trigger sender was dropped.
    #[error("dispatch queue closed")]
    QueueClosed,
}

/// Drives one task at a time to a terminal status.
#[derive(Debug)]
pub struct Driver {
    dispatcher: Arc<Dispatcher>,
    queue: mpsc::UnboundedReceiver<String>,
    worker_wait: Duration,
}

impl Driver {
    /// `worker_wait` bounds how long to wait for a worker's trigger.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        queue: mpsc::UnboundedReceiver<String>,
        worker_wait: Duration,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            worker_wait,
        }
    }

    /// Dispatches `task_id` until it is `completed` or `failed`, reporting
    /// progress after every step.
    ///
    /// # Errors
    ///
    /// See [`DriveError`].
    pub async fn run(
        &mut self,
        task_id: &str,
        mut observe: impl FnMut(&Progress) + Send,
    ) -> Result<TaskRecord, DriveError> {
        loop {
            let outcome = self.dispatcher.dispatch(task_id).await?;
            let record = self.dispatcher.store().get(task_id).await?;
            observe(&Progress::from_record(&record));

            match outcome {
                DispatchOutcome::Finished { .. } | DispatchOutcome::Failed { .. } => {
                    return Ok(record);
                },
                DispatchOutcome::Advanced { .. } | DispatchOutcome::Superseded => {},
                DispatchOutcome::RetryScheduled { retry_after, .. } => {
                    tokio::time::sleep(retry_after).await;
                },
                DispatchOutcome::HandedOff { .. } | DispatchOutcome::AwaitingWorker { .. } => {
                    self.wait_for_trigger(task_id).await?;
                },
            }
        }
    }

    async fn wait_for_trigger(&mut self, task_id: &str) -> Result<(), DriveError> {
        loop {
            let next = tokio::time::timeout(self.worker_wait, self.queue.recv())
                .await
                .map_err(|_| DriveError::WorkerSilent {
                    task_id: task_id.to_string(),
                    waited_ms: self.worker_wait.as_millis(),
                })?;
            match next {
                Some(id) if id == task_id => return Ok(()),
                Some(other) => {
                    tracing::debug!(task_id = %other, "ignoring trigger for another task");
                },
                None => return Err(DriveError::QueueClosed),
            }
        }
    }
}

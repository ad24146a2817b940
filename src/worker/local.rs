//! In-process invoker and trigger for single-process runs and tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{DispatchTrigger, GenerationWorker, InvokeError, WorkerInvoker, WorkerSnapshot};

/// Runs the [`GenerationWorker`] on a spawned tokio task.
#[derive(Debug, Clone)]
pub struct LocalWorkerInvoker {
    worker: Arc<GenerationWorker>,
}

impl LocalWorkerInvoker {
    pub fn new(worker: Arc<GenerationWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl WorkerInvoker for LocalWorkerInvoker {
    async fn invoke(&self, snapshot: WorkerSnapshot) -> Result<(), InvokeError> {
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            let task_id = snapshot.task_id.clone();
            match worker.run(snapshot).await {
                Ok(outcome) => {
                    tracing::debug!(task_id = %task_id, outcome = ?outcome, "worker finished");
                },
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "worker aborted");
                },
            }
        });
        Ok(())
    }
}

/// A [`DispatchTrigger`] that queues task IDs on a channel for whoever
/// drives the dispatcher.
#[derive(Debug, Clone)]
pub struct QueueTrigger {
    sender: mpsc::UnboundedSender<String>,
}

impl QueueTrigger {
    /// Creates a trigger and the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DispatchTrigger for QueueTrigger {
    async fn trigger(&self, task_id: &str) -> Result<(), InvokeError> {
        self.sender
            .send(task_id.to_string())
            .map_err(|_| InvokeError("dispatch queue is closed".to_string()))
    }
}

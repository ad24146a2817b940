//! Stages that delegate to the generation worker.

use async_trait::async_trait;

use super::{HandlerError, StageHandler, StageOutcome};
use crate::domain::TaskRecord;
use crate::types::status::TaskStatus;
use crate::worker::WorkerSnapshot;

fn snapshot(task: &TaskRecord) -> Result<WorkerSnapshot, HandlerError> {
    let images = task
        .state_data
        .downloaded_images
        .clone()
        .ok_or_else(|| HandlerError::invalid("downloaded images are missing"))?;
    Ok(WorkerSnapshot {
        task_id: task.id.clone(),
        stage: task.status,
        attempt: task.retry_count,
        params: task.params.clone(),
        downloaded_images: images,
    })
}

/// `downloaded`: hands the downloaded images to a generation worker.
///
/// The status stays `downloaded`; the worker moves the task to
/// `generating` when it claims it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadedHandler;

#[async_trait]
impl StageHandler for DownloadedHandler {
    fn stage(&self) -> TaskStatus {
        TaskStatus::Downloaded
    }

    async fn process(&self, task: &TaskRecord) -> Result<StageOutcome, HandlerError> {
        snapshot(task).map(StageOutcome::HandOff)
    }
}

/// `generating`: waits for the in-flight worker, or relaunches one after a
/// recorded worker failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratingHandler;

#[async_trait]
impl StageHandler for GeneratingHandler {
    fn stage(&self) -> TaskStatus {
        TaskStatus::Generating
    }

    async fn process(&self, task: &TaskRecord) -> Result<StageOutcome, HandlerError> {
        match &task.state_data.handoff {
            Some(handoff) if !handoff.settled_by(task.status, task.retry_count) => {
                Ok(StageOutcome::Wait)
            },
            _ => {
                tracing::info!(
                    task_id = %task.id,
                    attempt = task.retry_count,
                    "relaunching generation worker"
                );
                snapshot(task).map(StageOutcome::HandOff)
            },
        }
    }
}

//! Stages that only check the task and move it along.

use async_trait::async_trait;

use super::{HandlerError, StageHandler, StageOutcome};
use crate::domain::TaskRecord;
use crate::types::state_data::StatePatch;
use crate::types::status::TaskStatus;

/// `created`: validates the submission and starts downloading.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreatedHandler;

#[async_trait]
impl StageHandler for CreatedHandler {
    fn stage(&self) -> TaskStatus {
        TaskStatus::Created
    }

    async fn process(&self, task: &TaskRecord) -> Result<StageOutcome, HandlerError> {
        task.params
            .validate()
            .map_err(|e| HandlerError::invalid(e.to_string()))?;
        Ok(StageOutcome::Advance {
            next: TaskStatus::Downloading,
            patch: StatePatch::Empty,
        })
    }
}

/// `generated`: starts uploading once the worker has stored its output.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratedHandler;

#[async_trait]
impl StageHandler for GeneratedHandler {
    fn stage(&self) -> TaskStatus {
        TaskStatus::Generated
    }

    async fn process(&self, task: &TaskRecord) -> Result<StageOutcome, HandlerError> {
        if task.state_data.generated_images.is_none() {
            return Err(HandlerError::invalid("generated images are missing"));
        }
        Ok(StageOutcome::Advance {
            next: TaskStatus::Uploading,
            patch: StatePatch::Empty,
        })
    }
}

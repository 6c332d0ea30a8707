//! Pipeline error types.

use thiserror::Error;

use vmod_models::{JobId, JobState};
use vmod_store::StoreError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Pipeline is shutting down")]
    ShuttingDown,
}

impl PipelineError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Map a store error seen while handling `id`.
    pub fn from_store(id: &JobId, err: StoreError) -> Self {
        if err.is_not_found() {
            Self::NotFound(id.clone())
        } else {
            Self::Storage(err)
        }
    }
}

/// Result of a successful cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was queued or running and is now cancelled
    Cancelled,
    /// The job had already finished; nothing changed
    AlreadyTerminal(JobState),
}

impl CancelOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CancelOutcome::Cancelled)
    }
}

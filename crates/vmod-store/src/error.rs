//! Store error types.

use thiserror::Error;

use vmod_models::{JobId, JobState, ModelError};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Conflict on job {job_id}: expected {expected}, found {actual}")]
    Conflict {
        job_id: JobId,
        expected: JobState,
        actual: JobState,
    },

    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Invariant violated: {0}")]
    InvariantViolation(#[from] ModelError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn conflict(job_id: &JobId, expected: JobState, actual: JobState) -> Self {
        Self::Conflict {
            job_id: job_id.clone(),
            expected,
            actual,
        }
    }

    /// Lost a compare-and-set race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// The backing store could not serve the request.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Redis(_) | StoreError::Json(_)
        )
    }
}

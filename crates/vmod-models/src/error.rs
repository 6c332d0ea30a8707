//! Model error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid media reference: {0}")]
    InvalidMediaRef(String),

    #[error("Confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("Unknown job state: {0}")]
    UnknownState(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl ModelError {
    pub fn invalid_media_ref(msg: impl Into<String>) -> Self {
        Self::InvalidMediaRef(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

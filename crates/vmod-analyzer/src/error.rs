//! Analyzer error types.

use std::time::Duration;

use thiserror::Error;

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// Errors reported by a classification capability.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("Classification failed: {0}")]
    Failed(String),

    #[error("Classification timed out")]
    Timeout,

    #[error("Classification cancelled")]
    Cancelled,
}

impl ClassifyError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Errors reported by the analyzer pool.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("Analyzer timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("No analyzer slot available")]
    Busy,

    #[error("Analyzer pool is closed")]
    PoolClosed,
}

impl AnalyzerError {
    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    /// Failures that count as a spent attempt and may be retried.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(self, AnalyzerError::Timeout { .. } | AnalyzerError::Analysis(_))
    }
}

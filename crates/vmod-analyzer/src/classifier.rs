//! Classification capability contract.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vmod_models::{JobId, MediaRef, ModerationResult};

use crate::error::ClassifyError;

/// Sink for analyzer progress, in percent.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(u8) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Reporter that discards everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report progress; values above 100 are clamped.
    pub fn report(&self, percent: u8) {
        (self.sink)(percent.min(100));
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Everything a classifier gets besides the media reference.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub job_id: JobId,
    /// 1-based attempt number
    pub attempt: u32,
    /// Time budget for this call
    pub timeout: Duration,
    /// Cancelled when the job is cancelled or the call times out.
    /// Implementations should check it between steps.
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

impl AnalysisContext {
    pub fn new(job_id: JobId, attempt: u32, timeout: Duration) -> Self {
        Self {
            job_id,
            attempt,
            timeout,
            cancel: CancellationToken::new(),
            progress: ProgressReporter::noop(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }
}

/// Content classification capability.
///
/// The pipeline treats implementations as opaque: rule engines, ML
/// services and human review queues all fit behind this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        media_ref: &MediaRef,
        ctx: AnalysisContext,
    ) -> Result<ModerationResult, ClassifyError>;
}

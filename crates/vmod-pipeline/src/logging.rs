//! Structured job logging utilities.

use tracing::{error, info, warn, Span};
use vmod_models::JobId;

/// Job logger for consistent lifecycle lines.
///
/// Every line carries the job ID and the attempt it belongs to.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job_id: &JobId, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, percent: u8) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            percent = percent,
            "Job progress"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span covering one attempt of this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, attempt = self.attempt)
    }
}

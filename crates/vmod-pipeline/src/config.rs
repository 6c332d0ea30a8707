//! Pipeline configuration.

use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent analyzer calls
    pub analyzer_slots: usize,
    /// Analyzer invocations per job before it fails
    pub max_attempts: u32,
    /// Time budget for one analyzer call
    pub analyzer_timeout: Duration,
    /// Delay between failed attempts
    pub backoff: BackoffPolicy,
    /// Time an interrupted analyzer call gets to wind down
    pub cancel_grace: Duration,
    /// Minimum progress increase, in percent, worth an event
    pub progress_step: u8,
    /// Buffered events per subscriber
    pub event_buffer: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analyzer_slots: 2,
            max_attempts: 3,
            analyzer_timeout: Duration::from_secs(300),
            backoff: BackoffPolicy::default(),
            cancel_grace: Duration::from_secs(2),
            progress_step: 10,
            event_buffer: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            analyzer_slots: std::env::var("PIPELINE_ANALYZER_SLOTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            max_attempts: std::env::var("PIPELINE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            analyzer_timeout: Duration::from_secs(
                std::env::var("PIPELINE_ANALYZER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            backoff: BackoffPolicy::new(
                Duration::from_millis(
                    std::env::var("PIPELINE_BACKOFF_BASE_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(1000),
                ),
                Duration::from_millis(
                    std::env::var("PIPELINE_BACKOFF_MAX_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(60_000),
                ),
            ),
            cancel_grace: Duration::from_millis(
                std::env::var("PIPELINE_CANCEL_GRACE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            progress_step: std::env::var("PIPELINE_PROGRESS_STEP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            event_buffer: std::env::var("PIPELINE_EVENT_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64),
            shutdown_timeout: Duration::from_secs(
                std::env::var("PIPELINE_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Clamp values that would stall the pipeline.
    pub(crate) fn normalized(mut self) -> Self {
        self.analyzer_slots = self.analyzer_slots.max(1);
        self.max_attempts = self.max_attempts.max(1);
        self.progress_step = self.progress_step.clamp(1, 100);
        self.event_buffer = self.event_buffer.max(1);
        self
    }
}

//! Video moderation pipeline.
//!
//! This crate provides:
//! - The dispatcher that drives jobs through their state machine
//! - Retry backoff between analyzer attempts
//! - The `Pipeline` facade for submitting, observing and cancelling jobs
//! - Structured job logging and Prometheus metrics

pub mod config;
mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;

pub use config::PipelineConfig;
pub use error::{CancelOutcome, PipelineError, PipelineResult};
pub use logging::JobLogger;
pub use pipeline::Pipeline;
pub use retry::BackoffPolicy;

pub use vmod_analyzer::{AnalysisContext, Classifier, ClassifyError, ProgressReporter};
pub use vmod_events::Subscription;
pub use vmod_models::{ErrorCategory, EventKind, Job, JobEvent, JobId, JobState, ModerationResult};

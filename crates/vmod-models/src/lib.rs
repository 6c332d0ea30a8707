//! Shared data models for the video moderation pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Moderation jobs and their state machine
//! - Classification results and failure categories
//! - Job events pushed to subscribers

pub mod error;
pub mod event;
pub mod job;

pub use error::{ModelError, ModelResult};
pub use event::{EventKind, JobEvent};
pub use job::{ErrorCategory, Job, JobId, JobState, MediaRef, ModerationResult};

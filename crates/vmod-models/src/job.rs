//! Moderation job definitions and the job state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to uploaded media, owned by the storage service.
///
/// The pipeline never dereferences it; it is handed verbatim to the
/// classifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    /// Create a media reference, rejecting blank values.
    pub fn new(value: impl Into<String>) -> ModelResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ModelError::invalid_media_ref("media reference must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for an analyzer slot
    #[default]
    Queued,
    /// Claimed by the dispatcher, analyzer call in flight
    Running,
    /// Classified successfully
    Done,
    /// Out of attempts
    Failed,
    /// Cancelled on request
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Queued,
        JobState::Running,
        JobState::Done,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Queued)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ModelError::UnknownState(s.to_string()))
    }
}

/// Classification outcome produced by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModerationResult {
    /// Classification label (e.g. "safe", "flagged")
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl ModerationResult {
    /// Build a result, validating the confidence range.
    pub fn new(label: impl Into<String>, confidence: f64) -> ModelResult<Self> {
        let result = Self {
            label: label.into(),
            confidence,
        };
        result.validate()?;
        Ok(result)
    }

    /// Check that the confidence lies in [0, 1].
    pub fn validate(&self) -> ModelResult<()> {
        if (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(ModelError::ConfidenceOutOfRange(self.confidence))
        }
    }
}

/// Why the last attempt of a job failed.
///
/// This is what callers see for a failed job; raw analyzer messages stay in
/// the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The analyzer did not answer within its timeout
    Timeout,
    /// The analyzer reported an error
    Analysis,
    /// The analyzer returned a confidence outside [0, 1]
    InvalidResult,
    /// The worker holding the job went away
    Interrupted,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Analysis => "analysis",
            ErrorCategory::InvalidResult => "invalid_result",
            ErrorCategory::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A moderation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Media to classify
    pub media_ref: MediaRef,

    /// Identity of the submitter
    pub owner: String,

    /// Job state
    #[serde(default)]
    pub state: JobState,

    /// Analyzer invocations so far
    #[serde(default)]
    pub attempt: u32,

    /// Maximum analyzer invocations
    pub max_attempts: u32,

    /// Classification result (only when done)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ModerationResult>,

    /// Category of the most recent failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorCategory>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(media_ref: MediaRef, owner: impl Into<String>, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            media_ref,
            owner: owner.into(),
            state: JobState::Queued,
            attempt: 0,
            max_attempts,
            result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether another analyzer attempt is allowed.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Bump `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Verify the record-level invariants.
    pub fn check_invariants(&self) -> ModelResult<()> {
        if self.max_attempts == 0 {
            return Err(ModelError::invariant("max_attempts must be at least 1"));
        }
        if self.attempt > self.max_attempts {
            return Err(ModelError::invariant(format!(
                "attempt {} exceeds max_attempts {}",
                self.attempt, self.max_attempts
            )));
        }
        match (&self.result, self.state) {
            (Some(result), JobState::Done) => result.validate(),
            (None, JobState::Done) => Err(ModelError::invariant("done job without result")),
            (Some(_), state) => Err(ModelError::invariant(format!(
                "result present in state {}",
                state
            ))),
            (None, _) => Ok(()),
        }
    }
}

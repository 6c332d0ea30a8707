//! Job event types delivered to subscribers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{ErrorCategory, JobId, JobState, ModerationResult};

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The dispatcher claimed the job for an attempt
    Started { attempt: u32 },

    /// Analyzer-reported progress (0-100)
    Progress { percent: u8 },

    /// The attempt failed and the job goes back to the queue
    Retrying {
        attempt: u32,
        delay_ms: u64,
        error: ErrorCategory,
    },

    /// Classification finished
    Done { result: ModerationResult },

    /// All attempts used up
    Failed { error: ErrorCategory, attempts: u32 },

    /// Cancelled on request
    Cancelled,
}

impl EventKind {
    /// Terminal events end a subscription and are never dropped.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Done { .. } | EventKind::Failed { .. } | EventKind::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started { .. } => "started",
            EventKind::Progress { .. } => "progress",
            EventKind::Retrying { .. } => "retrying",
            EventKind::Done { .. } => "done",
            EventKind::Failed { .. } => "failed",
            EventKind::Cancelled => "cancelled",
        }
    }

    pub fn progress(percent: u8) -> Self {
        Self::Progress {
            percent: percent.min(100),
        }
    }

    /// Terminal event describing a job already in a terminal state.
    ///
    /// Returns `None` for non-terminal states, or for a done job missing its
    /// result.
    pub fn terminal_for(
        state: JobState,
        result: Option<&ModerationResult>,
        last_error: Option<ErrorCategory>,
        attempts: u32,
    ) -> Option<Self> {
        match state {
            JobState::Done => result.map(|r| EventKind::Done { result: r.clone() }),
            JobState::Failed => Some(EventKind::Failed {
                error: last_error.unwrap_or(ErrorCategory::Analysis),
                attempts,
            }),
            JobState::Cancelled => Some(EventKind::Cancelled),
            JobState::Queued | JobState::Running => None,
        }
    }
}

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobEvent {
    pub job_id: JobId,
    /// Per-job sequence number, increasing in emission order
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl JobEvent {
    pub fn new(job_id: JobId, seq: u64, kind: EventKind) -> Self {
        Self {
            job_id,
            seq,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

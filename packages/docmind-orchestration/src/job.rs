//! Job model and state machine for background indexing operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier, assigned at start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle states. Terminal states are final: no transitions out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::TimedOut
        )
    }

    /// Valid transitions: Pending -> Running, Pending/Running -> terminal.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            JobState::Pending => matches!(
                next,
                JobState::Running | JobState::Failed | JobState::Cancelled
            ),
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Worker-reported processing statistics.
///
/// Mutated only via progress and completion events, never externally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub files_found: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub documents_added: u64,
    pub processing_time_seconds: f64,
}

/// One in-flight (or finished) background indexing operation bound to a
/// resource key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Unit of work (e.g. a folder path); at most one non-terminal job per key.
    pub resource_key: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    /// Set only on the terminal transition.
    pub finished_at: Option<DateTime<Utc>>,
    pub statistics: JobStatistics,
    /// Raw failure text, set when the job fails.
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(resource_key: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            resource_key: resource_key.into(),
            state: JobState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            statistics: JobStatistics::default(),
            error_message: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Wall-clock duration, up to now for jobs still running.
    pub fn duration(&self) -> chrono::Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        end - self.started_at
    }
}

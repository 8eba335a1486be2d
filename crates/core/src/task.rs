use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Task`]. Exactly one at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and Failed tasks are archived and never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Retrying => write!(f, "retrying"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One URL to be probed, plus its scheduling metadata.
///
/// The URL is the identity key. Tasks are only mutated through the queue's
/// transition operations; everything here is plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task<R> {
    pub url: String,
    /// Higher dispatches first.
    pub priority: i32,
    pub status: TaskStatus,
    /// Incremented once per dispatch.
    pub attempts: u32,
    /// Prober payload, present only when Completed.
    pub result: Option<R>,
    /// Failure message, present only when Failed. Retry errors are carried
    /// by the `task-retrying` event instead.
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Submission sequence number, used as the priority tie-break.
    pub seq: u64,
    /// When a Retrying task becomes eligible for dispatch again.
    #[serde(skip)]
    pub retry_at: Option<Instant>,
}

impl<R> Task<R> {
    /// Create a fresh Pending task.
    pub fn new(url: impl Into<String>, priority: i32, seq: u64) -> Self {
        Self {
            url: url.into(),
            priority,
            status: TaskStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            seq,
            retry_at: None,
        }
    }

    /// Time between the last dispatch and reaching a terminal state.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        completed.signed_duration_since(started).to_std().ok()
    }

    /// Whether a Retrying task's delay has elapsed at `now`.
    pub fn retry_due(&self, now: Instant) -> bool {
        self.status == TaskStatus::Retrying && self.retry_at.map_or(true, |at| at <= now)
    }
}

/// Diagnostics kept for a task that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub url: String,
    pub attempts: u32,
    pub error: String,
}

impl<R> From<&Task<R>> for FailedTask {
    fn from(task: &Task<R>) -> Self {
        Self {
            url: task.url.clone(),
            attempts: task.attempts,
            error: task.error.clone().unwrap_or_default(),
        }
    }
}

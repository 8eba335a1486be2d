//! Queue event payloads.
//!
//! The set of event kinds is closed. Each [`QueueEvent`] variant carries its
//! own payload type; subscribers match on the variant instead of digging
//! through a free-form map.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stats::QueueStats;

/// Discriminant of a [`QueueEvent`], used to pick subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TaskAdded,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRetrying,
    QueueEmpty,
    ProgressUpdate,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::TaskAdded,
        EventKind::TaskStarted,
        EventKind::TaskCompleted,
        EventKind::TaskFailed,
        EventKind::TaskRetrying,
        EventKind::QueueEmpty,
        EventKind::ProgressUpdate,
        EventKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskAdded => "task-added",
            EventKind::TaskStarted => "task-started",
            EventKind::TaskCompleted => "task-completed",
            EventKind::TaskFailed => "task-failed",
            EventKind::TaskRetrying => "task-retrying",
            EventKind::QueueEmpty => "queue-empty",
            EventKind::ProgressUpdate => "progress-update",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once per newly submitted URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAdded {
    pub url: String,
    pub priority: i32,
}

/// Emitted when a worker takes a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub url: String,
    /// 1-based attempt number of this dispatch.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub url: String,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
}

/// Emitted when a task exhausts its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailed {
    pub url: String,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRetrying {
    pub url: String,
    /// Attempt that just failed.
    pub attempt: u32,
    pub error: String,
    pub retry_in_ms: u64,
}

/// Emitted once per run when nothing is live and no worker is busy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEmpty {
    pub run_id: Uuid,
    pub completed: usize,
    pub failed: usize,
}

/// Non-task errors: startup failures and rejected transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub url: Option<String>,
}

/// A state change published on the [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum QueueEvent {
    TaskAdded(TaskAdded),
    TaskStarted(TaskStarted),
    TaskCompleted(TaskCompleted),
    TaskFailed(TaskFailed),
    TaskRetrying(TaskRetrying),
    QueueEmpty(QueueEmpty),
    ProgressUpdate(QueueStats),
    Error(ErrorEvent),
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::TaskAdded(_) => EventKind::TaskAdded,
            QueueEvent::TaskStarted(_) => EventKind::TaskStarted,
            QueueEvent::TaskCompleted(_) => EventKind::TaskCompleted,
            QueueEvent::TaskFailed(_) => EventKind::TaskFailed,
            QueueEvent::TaskRetrying(_) => EventKind::TaskRetrying,
            QueueEvent::QueueEmpty(_) => EventKind::QueueEmpty,
            QueueEvent::ProgressUpdate(_) => EventKind::ProgressUpdate,
            QueueEvent::Error(_) => EventKind::Error,
        }
    }

    /// URL the event is about, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            QueueEvent::TaskAdded(e) => Some(&e.url),
            QueueEvent::TaskStarted(e) => Some(&e.url),
            QueueEvent::TaskCompleted(e) => Some(&e.url),
            QueueEvent::TaskFailed(e) => Some(&e.url),
            QueueEvent::TaskRetrying(e) => Some(&e.url),
            QueueEvent::Error(e) => e.url.as_deref(),
            QueueEvent::QueueEmpty(_) | QueueEvent::ProgressUpdate(_) => None,
        }
    }
}

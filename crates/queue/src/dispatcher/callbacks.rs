use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sitescan_core::{FailedTask, Task};
use uuid::Uuid;

use crate::progress::StatusSink;
use crate::stats::QueueStats;

pub type TaskCallback<R> = Arc<dyn Fn(&Task<R>) + Send + Sync>;

/// Optional hooks invoked by the dispatcher during a run.
///
/// ```ignore
/// let callbacks = RunCallbacks::new()
///     .on_result(|task| println!("ok {}", task.url))
///     .on_error(|task| eprintln!("failed {}", task.url))
///     .on_short_status(|line| eprint!("\r{line}"));
/// ```
pub struct RunCallbacks<R> {
    on_result: Option<TaskCallback<R>>,
    on_error: Option<TaskCallback<R>>,
    on_short_status: Option<StatusSink>,
}

impl<R> RunCallbacks<R> {
    pub fn new() -> Self {
        Self {
            on_result: None,
            on_error: None,
            on_short_status: None,
        }
    }

    /// Called with the archived task each time a probe succeeds.
    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&Task<R>) + Send + Sync + 'static,
    {
        self.on_result = Some(Arc::new(f));
        self
    }

    /// Called once per task when it fails for the last time.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Task<R>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Receives each short status line while the run is active.
    pub fn on_short_status<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_short_status = Some(Arc::new(f));
        self
    }

    pub(super) fn result(&self, task: &Task<R>) {
        if let Some(f) = &self.on_result {
            f(task);
        }
    }

    pub(super) fn error(&self, task: &Task<R>) {
        if let Some(f) = &self.on_error {
            f(task);
        }
    }

    pub(super) fn status_sink(&self) -> Option<StatusSink> {
        self.on_short_status.clone()
    }
}

impl<R> Default for RunCallbacks<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for RunCallbacks<R> {
    fn clone(&self) -> Self {
        Self {
            on_result: self.on_result.clone(),
            on_error: self.on_error.clone(),
            on_short_status: self.on_short_status.clone(),
        }
    }
}

/// What a run produced. Returned even when every task failed.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<R> {
    pub run_id: Uuid,
    /// Completed tasks in completion order.
    pub completed: Vec<Task<R>>,
    pub failed: Vec<FailedTask>,
    pub stats: QueueStats,
    pub elapsed_ms: u64,
    /// The run was stopped via [`Dispatcher::cancel`](super::Dispatcher::cancel).
    pub cancelled: bool,
}

impl<R> RunSummary<R> {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Every task completed and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    /// `(url, result)` pairs for completed tasks.
    pub fn results(&self) -> impl Iterator<Item = (&str, &R)> {
        self.completed
            .iter()
            .filter_map(|t| t.result.as_ref().map(|r| (t.url.as_str(), r)))
    }
}

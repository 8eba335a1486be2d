use std::time::Instant;

use chrono::Utc;
use sitescan_core::{ScanError, Task, TaskStatus};
use tracing::{debug, warn};

use crate::events::{
    ErrorEvent, QueueEvent, TaskCompleted, TaskFailed, TaskRetrying, TaskStarted,
};
use crate::retry::RetryDecision;

use super::state::QueueState;
use super::TaskQueue;

impl<R: Clone + Send + 'static> TaskQueue<R> {
    /// Take the highest-priority Pending task, if a worker slot is free.
    ///
    /// Returns `None` when nothing is dispatchable or when `max_concurrent`
    /// tasks are already in flight. Never blocks.
    pub fn dequeue_next(&self) -> Option<Task<R>> {
        let mut events = Vec::new();
        let task = {
            let mut state = self.lock();
            state.promote_due(Instant::now());

            if state.active.len() >= self.shared.config.max_concurrent {
                return None;
            }
            let idx = state
                .live
                .iter()
                .position(|t| t.status == TaskStatus::Pending)?;

            let url = state.live[idx].url.clone();
            state.active.insert(url);

            let task = &mut state.live[idx];
            task.status = TaskStatus::InProgress;
            task.started_at = Some(Utc::now());
            task.attempts += 1;
            debug!(
                url = %task.url,
                attempt = task.attempts,
                priority = task.priority,
                "dispatching task"
            );
            events.push(QueueEvent::TaskStarted(TaskStarted {
                url: task.url.clone(),
                attempt: task.attempts,
            }));
            task.clone()
        };
        self.after_mutation(events);
        Some(task)
    }

    /// Move Retrying tasks whose delay has elapsed back to Pending.
    pub fn promote_due_retries(&self) -> usize {
        let promoted = self.lock().promote_due(Instant::now());
        if promoted > 0 {
            self.after_mutation(Vec::new());
        }
        promoted
    }

    /// Archive an InProgress task as Completed with the prober's result.
    pub fn mark_completed(&self, url: &str, result: R) -> Result<(), ScanError> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock();
            take_in_progress(&mut state, url, "complete").map(|mut task| {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                task.result = Some(result);
                task.error = None;
                state.active.remove(url);

                let duration_ms = task.duration().map(|d| d.as_millis() as u64);
                debug!(url, attempts = task.attempts, duration_ms, "task completed");
                events.push(QueueEvent::TaskCompleted(TaskCompleted {
                    url: task.url.clone(),
                    attempts: task.attempts,
                    duration_ms,
                }));
                state.completed.push(task);
                state.check_drain(&mut events);
            })
        };
        self.finish_transition(outcome, url, events)
    }

    /// Record a failed attempt and let the retry policy decide what happens.
    ///
    /// On retry the task becomes Retrying and is re-eligible for dispatch
    /// once the delay elapses; `attempts` is kept and the error travels only
    /// in the `task-retrying` event. On give-up the task is archived as
    /// Failed with the triggering error.
    pub fn mark_failed(
        &self,
        url: &str,
        error: impl Into<String>,
    ) -> Result<RetryDecision, ScanError> {
        let error = error.into();
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock();
            match state.position(url) {
                Some(idx) if state.live[idx].status == TaskStatus::InProgress => {
                    let decision = self.shared.retry.decide(state.live[idx].attempts);
                    state.active.remove(url);
                    match decision {
                        RetryDecision::Retry { delay } => {
                            let task = &mut state.live[idx];
                            task.status = TaskStatus::Retrying;
                            task.retry_at = Some(Instant::now() + delay);
                            task.error = None;
                            warn!(
                                url,
                                attempt = task.attempts,
                                retry_in = ?delay,
                                error = %error,
                                "task failed, retrying"
                            );
                            events.push(QueueEvent::TaskRetrying(TaskRetrying {
                                url: url.to_string(),
                                attempt: task.attempts,
                                error,
                                retry_in_ms: delay.as_millis() as u64,
                            }));
                        }
                        RetryDecision::GiveUp => {
                            let mut task = state.live.remove(idx);
                            task.status = TaskStatus::Failed;
                            task.completed_at = Some(Utc::now());
                            task.error = Some(error.clone());
                            warn!(
                                url,
                                attempts = task.attempts,
                                error = %error,
                                "task failed permanently"
                            );
                            events.push(QueueEvent::TaskFailed(TaskFailed {
                                url: url.to_string(),
                                attempts: task.attempts,
                                error,
                            }));
                            state.failed.push(task);
                            state.check_drain(&mut events);
                        }
                    }
                    Ok(decision)
                }
                _ => Err(transition_error(&state, url, "fail")),
            }
        };
        match outcome {
            Ok(decision) => {
                self.after_mutation(events);
                Ok(decision)
            }
            Err(e) => Err(self.report_rejected(url, e)),
        }
    }

    /// Return an InProgress task to Pending without counting the attempt.
    ///
    /// Used when a probe is abandoned (e.g. cancelled) rather than settled.
    pub fn release(&self, url: &str) -> Result<(), ScanError> {
        let outcome = {
            let mut state = self.lock();
            match state.position(url) {
                Some(idx) if state.live[idx].status == TaskStatus::InProgress => {
                    let task = &mut state.live[idx];
                    task.status = TaskStatus::Pending;
                    task.attempts = task.attempts.saturating_sub(1);
                    task.started_at = None;
                    state.active.remove(url);
                    debug!(url, "task released back to pending");
                    Ok(())
                }
                _ => Err(transition_error(&state, url, "release")),
            }
        };
        self.finish_transition(outcome, url, Vec::new())
    }

    fn finish_transition(
        &self,
        outcome: Result<(), ScanError>,
        url: &str,
        events: Vec<QueueEvent>,
    ) -> Result<(), ScanError> {
        match outcome {
            Ok(()) => {
                self.after_mutation(events);
                Ok(())
            }
            Err(e) => Err(self.report_rejected(url, e)),
        }
    }

    /// Publish an `error` event for a rejected transition and hand the error back.
    fn report_rejected(&self, url: &str, error: ScanError) -> ScanError {
        warn!(url, error = %error, "rejected task transition");
        self.shared.bus.publish(QueueEvent::Error(ErrorEvent {
            message: error.to_string(),
            url: Some(url.to_string()),
        }));
        error
    }
}

/// Remove `url` from the live set if it is InProgress.
fn take_in_progress<R>(
    state: &mut QueueState<R>,
    url: &str,
    op: &'static str,
) -> Result<Task<R>, ScanError> {
    match state.position(url) {
        Some(idx) if state.live[idx].status == TaskStatus::InProgress => {
            Ok(state.live.remove(idx))
        }
        _ => Err(transition_error(state, url, op)),
    }
}

fn transition_error<R>(state: &QueueState<R>, url: &str, op: &'static str) -> ScanError {
    match state.status_of(url) {
        Some(from) => ScanError::InvalidTransition {
            url: url.to_string(),
            from,
            op,
        },
        None => ScanError::UnknownTask(url.to_string()),
    }
}

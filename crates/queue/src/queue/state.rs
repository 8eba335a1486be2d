use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Instant;

use sitescan_core::{Task, TaskStatus};
use uuid::Uuid;

use crate::events::{QueueEmpty, QueueEvent};
use crate::stats::QueueStats;

/// Bookkeeping for the run currently using the queue.
#[derive(Debug)]
pub(crate) struct RunMarker {
    pub id: Uuid,
    pub started: Instant,
    /// Archive lengths when the run began; later entries belong to this run.
    pub completed_offset: usize,
    pub failed_offset: usize,
    pub drained_emitted: bool,
}

impl RunMarker {
    pub fn new(completed_offset: usize, failed_offset: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            completed_offset,
            failed_offset,
            drained_emitted: false,
        }
    }
}

/// Everything guarded by the queue mutex.
pub(crate) struct QueueState<R> {
    /// Non-terminal tasks, ordered by priority (desc) then submission (asc).
    pub live: Vec<Task<R>>,
    pub completed: Vec<Task<R>>,
    pub failed: Vec<Task<R>>,
    /// URLs currently held by a worker.
    pub active: HashSet<String>,
    /// Every URL live or archived; used to reject duplicates.
    pub known: HashSet<String>,
    pub next_seq: u64,
    pub run: RunMarker,
}

impl<R> QueueState<R> {
    pub fn new() -> Self {
        Self {
            live: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            active: HashSet::new(),
            known: HashSet::new(),
            next_seq: 0,
            run: RunMarker::new(0, 0),
        }
    }

    /// Tasks archived since the current run began.
    pub fn run_done(&self) -> usize {
        (self.completed.len() - self.run.completed_offset)
            + (self.failed.len() - self.run.failed_offset)
    }

    pub fn position(&self, url: &str) -> Option<usize> {
        self.live.iter().position(|t| t.url == url)
    }

    /// Stable by construction: `seq` is unique and increases with submission.
    pub fn sort_live(&mut self) {
        self.live.sort_by_key(|t| (Reverse(t.priority), t.seq));
    }

    /// Status of `url` wherever it lives, for error reporting.
    pub fn status_of(&self, url: &str) -> Option<TaskStatus> {
        self.live
            .iter()
            .chain(self.completed.iter())
            .chain(self.failed.iter())
            .find(|t| t.url == url)
            .map(|t| t.status)
    }

    /// Move Retrying tasks whose delay has elapsed back to Pending.
    pub fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        for task in self.live.iter_mut().filter(|t| t.retry_due(now)) {
            task.status = TaskStatus::Pending;
            task.retry_at = None;
            promoted += 1;
        }
        promoted
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.live
            .iter()
            .filter(|t| t.status == TaskStatus::Retrying)
            .filter_map(|t| t.retry_at)
            .min()
    }

    pub fn is_drained(&self) -> bool {
        self.live.is_empty() && self.active.is_empty()
    }

    /// Push a `queue-empty` event the first time this run drains.
    pub fn check_drain(&mut self, events: &mut Vec<QueueEvent>) {
        if self.is_drained() && !self.run.drained_emitted {
            self.run.drained_emitted = true;
            events.push(QueueEvent::QueueEmpty(QueueEmpty {
                run_id: self.run.id,
                completed: self.completed.len() - self.run.completed_offset,
                failed: self.failed.len() - self.run.failed_offset,
            }));
        }
    }

    /// Raw counts; derived fields are filled in by the caller.
    pub fn counts(&self, max_concurrent: usize) -> QueueStats {
        let mut stats = QueueStats {
            total: self.live.len() + self.completed.len() + self.failed.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
            active_workers: self.active.len(),
            max_concurrent,
            ..Default::default()
        };
        for task in &self.live {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Retrying => stats.retrying += 1,
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }
        stats
    }
}

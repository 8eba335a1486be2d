use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use sitescan_core::{FailedTask, ScanError, SchedulerConfig, Task, TaskStatus};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Subscription};
use crate::events::{EventKind, QueueEvent, TaskAdded};
use crate::monitor::ResourceMonitor;
use crate::progress::ProgressThrottle;
use crate::retry::RetryPolicy;
use crate::stats::QueueStats;

use super::state::{QueueState, RunMarker};

pub(super) struct Shared<R> {
    pub state: Mutex<QueueState<R>>,
    pub config: SchedulerConfig,
    pub retry: RetryPolicy,
    pub bus: EventBus,
    pub throttle: ProgressThrottle,
    pub monitor: Option<ResourceMonitor>,
    /// Signalled after every mutation so idle workers can re-check.
    pub changed: Notify,
}

/// Priority queue of probe tasks with retry handling and event publication.
///
/// All task state lives behind one mutex; every mutation goes through the
/// methods here and in `transitions`. Events are published after the lock is
/// released. Cloning yields another handle to the same queue.
pub struct TaskQueue<R> {
    pub(super) shared: Arc<Shared<R>>,
}

impl<R> Clone for TaskQueue<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Clone + Send + 'static> TaskQueue<R> {
    /// Create a queue. Fails if the config does not validate.
    pub fn new(config: SchedulerConfig) -> Result<Self, ScanError> {
        Self::with_bus(config, EventBus::new())
    }

    /// Create a queue publishing on an existing bus.
    pub fn with_bus(config: SchedulerConfig, bus: EventBus) -> Result<Self, ScanError> {
        config.validate()?;
        let monitor = config.sample_resources.then(ResourceMonitor::new);
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new()),
                retry: RetryPolicy::from_config(&config),
                throttle: ProgressThrottle::new(config.progress_update_interval()),
                config,
                bus,
                monitor,
                changed: Notify::new(),
            }),
        })
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, QueueState<R>> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish collected events, wake idle workers and offer a progress update.
    pub(super) fn after_mutation(&self, events: Vec<QueueEvent>) {
        for event in events {
            self.shared.bus.publish(event);
        }
        self.shared.changed.notify_waiters();
        self.offer_progress();
    }

    /// Publish a `progress-update` if the throttle allows one.
    pub fn offer_progress(&self) {
        if self.shared.throttle.try_acquire() {
            self.shared.bus.publish(QueueEvent::ProgressUpdate(self.stats()));
        }
    }

    // ── Submission ───────────────────────────────────────────

    /// Add URLs not already known to this queue (live or archived).
    ///
    /// Priority comes from the first matching pattern. The live set is
    /// re-sorted by priority with submission order as the tie-break.
    /// Returns how many tasks were added.
    pub fn submit<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events = Vec::new();
        let mut skipped = 0usize;
        {
            let mut state = self.lock();
            for url in urls {
                let url = url.into();
                if state.known.contains(&url) {
                    skipped += 1;
                    continue;
                }
                let priority = self.shared.config.priority_for(&url);
                let seq = state.next_seq;
                state.next_seq += 1;
                state.known.insert(url.clone());
                events.push(QueueEvent::TaskAdded(TaskAdded {
                    url: url.clone(),
                    priority,
                }));
                state.live.push(Task::new(url, priority, seq));
            }
            if !events.is_empty() {
                state.sort_live();
            }
        }

        if skipped > 0 {
            debug!(skipped, "skipped duplicate URLs");
        }
        let added = events.len();
        if added > 0 {
            self.after_mutation(events);
        }
        added
    }

    /// Add a single URL, rejecting it if the queue already knows it.
    pub fn try_submit(&self, url: impl Into<String>) -> Result<(), ScanError> {
        let url = url.into();
        if self.submit([url.clone()]) == 0 {
            warn!(url = %url, "duplicate submission rejected");
            return Err(ScanError::DuplicateTask(url));
        }
        Ok(())
    }

    /// Drop every Pending or Retrying task. In-flight tasks are untouched.
    ///
    /// Cleared URLs are forgotten and may be submitted again.
    pub fn clear_pending(&self) -> usize {
        let mut events = Vec::new();
        let cleared = {
            let mut state = self.lock();
            let (keep, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut state.live)
                .into_iter()
                .partition(|t| t.status == TaskStatus::InProgress);
            state.live = keep;
            for task in &removed {
                state.known.remove(&task.url);
            }
            state.check_drain(&mut events);
            removed.len()
        };
        if cleared > 0 {
            info!(cleared, "cleared pending tasks");
        }
        self.after_mutation(events);
        cleared
    }

    // ── Runs ─────────────────────────────────────────────────

    /// Start a new run: fresh run id, elapsed clock, archive offsets and
    /// drain flag. Returns the run id.
    pub fn begin_run(&self) -> Uuid {
        let mut state = self.lock();
        state.run = RunMarker::new(state.completed.len(), state.failed.len());
        self.shared.throttle.reset();
        state.run.id
    }

    pub fn run_id(&self) -> Uuid {
        self.lock().run.id
    }

    /// Emit `queue-empty` if the queue is drained and this run has not yet
    /// reported it.
    pub fn check_drain(&self) {
        let mut events = Vec::new();
        self.lock().check_drain(&mut events);
        if !events.is_empty() {
            self.after_mutation(events);
        }
    }

    /// Tasks archived since the current run began, in archive order.
    pub fn run_archives(&self) -> (Vec<Task<R>>, Vec<FailedTask>) {
        let state = self.lock();
        let completed = state.completed[state.run.completed_offset..].to_vec();
        let failed = state.failed[state.run.failed_offset..]
            .iter()
            .map(FailedTask::from)
            .collect();
        (completed, failed)
    }

    // ── Reads ────────────────────────────────────────────────

    /// Point-in-time aggregate statistics.
    pub fn stats(&self) -> QueueStats {
        let (counts, durations, run_done, elapsed) = {
            let state = self.lock();
            let durations: Vec<_> = state.completed.iter().filter_map(|t| t.duration()).collect();
            (
                state.counts(self.shared.config.max_concurrent),
                durations,
                state.run_done(),
                state.run.started.elapsed(),
            )
        };
        let mut stats = counts.derive(durations.into_iter(), run_done, elapsed);
        stats.resources = self.shared.monitor.as_ref().and_then(|m| m.sample());
        stats
    }

    /// Nothing live and no worker busy.
    pub fn is_drained(&self) -> bool {
        self.lock().is_drained()
    }

    /// Number of live (non-archived) tasks.
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Snapshot of a task, live or archived.
    pub fn get(&self, url: &str) -> Option<Task<R>> {
        let state = self.lock();
        state
            .live
            .iter()
            .chain(state.completed.iter())
            .chain(state.failed.iter())
            .find(|t| t.url == url)
            .cloned()
    }

    /// Live tasks in dispatch order.
    pub fn live(&self) -> Vec<Task<R>> {
        self.lock().live.clone()
    }

    pub fn completed(&self) -> Vec<Task<R>> {
        self.lock().completed.clone()
    }

    pub fn failed(&self) -> Vec<Task<R>> {
        self.lock().failed.clone()
    }

    /// Earliest instant at which a Retrying task becomes Pending again.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.lock().next_retry_at()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.retry
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, handler)
    }

    pub(crate) fn changed(&self) -> &Notify {
        &self.shared.changed
    }
}

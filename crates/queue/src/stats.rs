//! Aggregate queue statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::ResourceSample;

/// Point-in-time snapshot of the queue, recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    /// `(completed + failed) / total * 100`.
    pub progress: f64,
    /// Mean duration over completed tasks.
    pub average_duration_ms: Option<f64>,
    /// `remaining * average_duration / max_concurrent`.
    pub estimated_time_remaining_ms: Option<u64>,
    pub active_workers: usize,
    pub max_concurrent: usize,
    /// Time since the current run began.
    pub elapsed_ms: u64,
    /// Tasks finished during the current run, per minute of its elapsed time.
    pub throughput_per_minute: f64,
    pub resources: Option<ResourceSample>,
}

impl QueueStats {
    /// Fill in the derived fields from the raw counts. `run_done` and
    /// `elapsed` cover the current run only.
    pub(crate) fn derive(
        mut self,
        completed_durations: impl Iterator<Item = Duration>,
        run_done: usize,
        elapsed: Duration,
    ) -> Self {
        let (sum, count) = completed_durations
            .fold((0f64, 0usize), |(sum, n), d| (sum + d.as_secs_f64() * 1000.0, n + 1));

        self.progress = if self.total == 0 {
            100.0
        } else {
            self.done() as f64 / self.total as f64 * 100.0
        };

        self.average_duration_ms = (count > 0).then(|| sum / count as f64);

        let remaining = self.remaining();
        self.estimated_time_remaining_ms = if remaining == 0 {
            Some(0)
        } else {
            self.average_duration_ms.map(|avg| {
                (remaining as f64 * avg / self.max_concurrent.max(1) as f64).round() as u64
            })
        };

        self.elapsed_ms = elapsed.as_millis() as u64;
        let minutes = elapsed.as_secs_f64() / 60.0;
        self.throughput_per_minute = if minutes > 0.0 {
            run_done as f64 / minutes
        } else {
            0.0
        };

        self
    }

    /// Tasks that reached a terminal state.
    pub fn done(&self) -> usize {
        self.completed + self.failed
    }

    /// Tasks still in the live queue.
    pub fn remaining(&self) -> usize {
        self.pending + self.in_progress + self.retrying
    }

    pub fn is_drained(&self) -> bool {
        self.remaining() == 0 && self.active_workers == 0
    }

    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.estimated_time_remaining_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: usize, in_progress: usize, completed: usize, failed: usize) -> QueueStats {
        QueueStats {
            total: pending + in_progress + completed + failed,
            pending,
            in_progress,
            completed,
            failed,
            active_workers: in_progress,
            max_concurrent: 2,
            ..Default::default()
        }
    }

    #[test]
    fn progress_is_exactly_100_when_everything_finished() {
        let stats = counts(0, 0, 2, 1).derive(std::iter::empty(), 3, Duration::from_secs(1));
        assert_eq!(stats.progress, 100.0);
        assert!(stats.is_drained());
    }

    #[test]
    fn progress_of_empty_queue_is_100() {
        let stats = QueueStats::default().derive(std::iter::empty(), 0, Duration::ZERO);
        assert_eq!(stats.progress, 100.0);
    }

    #[test]
    fn partial_progress() {
        let stats = counts(3, 0, 1, 0).derive(std::iter::empty(), 1, Duration::ZERO);
        assert_eq!(stats.progress, 25.0);
        assert_eq!(stats.remaining(), 3);
    }

    #[test]
    fn average_and_eta() {
        let durations = [Duration::from_millis(100), Duration::from_millis(300)];
        let stats = counts(4, 0, 2, 0).derive(durations.into_iter(), 2, Duration::from_secs(30));
        assert_eq!(stats.average_duration_ms, Some(200.0));
        // 4 remaining * 200ms / 2 workers
        assert_eq!(stats.estimated_time_remaining_ms, Some(400));
        assert_eq!(stats.estimated_time_remaining(), Some(Duration::from_millis(400)));
    }

    #[test]
    fn eta_unknown_before_first_completion() {
        let stats = counts(4, 1, 0, 0).derive(std::iter::empty(), 0, Duration::from_secs(1));
        assert!(stats.average_duration_ms.is_none());
        assert!(stats.estimated_time_remaining_ms.is_none());
    }

    #[test]
    fn throughput_per_minute() {
        let stats = counts(0, 0, 10, 2).derive(std::iter::empty(), 12, Duration::from_secs(30));
        assert_eq!(stats.throughput_per_minute, 24.0);
        assert_eq!(stats.elapsed_ms, 30_000);
    }

    #[test]
    fn throughput_counts_only_the_current_run() {
        // 12 archived overall, 3 of them since the run began.
        let stats = counts(0, 0, 10, 2).derive(std::iter::empty(), 3, Duration::from_secs(30));
        assert_eq!(stats.throughput_per_minute, 6.0);
        assert_eq!(stats.progress, 100.0);
    }
}

//! Progress reporting.
//!
//! Two independent mechanisms:
//! 1. **Throttle**: every queue mutation offers a progress update, but one is
//!    published only if `progress_update_interval` has passed since the last.
//! 2. **Status ticker**: a background task that renders a compact,
//!    overwritable status line every `status_update_interval`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::stats::QueueStats;

// ── Throttle ─────────────────────────────────────────────────────────

/// Rate limiter for `progress-update` events.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: Mutex::new(None),
        }
    }

    /// Returns `true` (and records the emission) if an update may go out now.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> bool {
        let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Forget the last emission so the next offer goes through.
    pub fn reset(&self) {
        *self.last_emit.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

// ── Status line ──────────────────────────────────────────────────────

/// Render a one-line status summary, e.g.
/// `[ 45.0%] 9/20 | workers 2/3 | mem 123.4MB | ETA 1m 05s | 12.3/min`.
pub fn format_status_line(stats: &QueueStats) -> String {
    let failed = if stats.failed > 0 {
        format!(" ({} failed)", stats.failed)
    } else {
        String::new()
    };
    let memory = stats
        .resources
        .map(|r| format!("{:.1}MB", r.memory_mb()))
        .unwrap_or_else(|| "n/a".to_string());
    let eta = stats
        .estimated_time_remaining()
        .map(format_eta)
        .unwrap_or_else(|| "--".to_string());

    format!(
        "[{:5.1}%] {}/{}{} | workers {}/{} | mem {} | ETA {} | {:.1}/min",
        stats.progress,
        stats.done(),
        stats.total,
        failed,
        stats.active_workers,
        stats.max_concurrent,
        memory,
        eta,
        stats.throughput_per_minute,
    )
}

fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

// ── Ticker ───────────────────────────────────────────────────────────

pub type StatusSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Background task emitting status lines until stopped.
pub struct StatusTicker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl StatusTicker {
    /// Spawn the ticker. `source` is polled for fresh stats on every tick.
    /// A final line is emitted when the ticker stops.
    pub fn start<S>(interval: Duration, source: S, sink: StatusSink) -> Self
    where
        S: Fn() -> QueueStats + Send + 'static,
    {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the immediate first tick; nothing has happened yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sink(&format_status_line(&source()));
                    }
                    _ = token.cancelled() => {
                        sink(&format_status_line(&source()));
                        break;
                    }
                }
            }
        });
        Self { stop, handle }
    }

    /// Stop the ticker and wait for its final line.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "status ticker task failed");
        }
    }
}

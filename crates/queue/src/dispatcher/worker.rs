use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use sitescan_core::Task;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::prober::{ProbeError, Prober};
use crate::queue::TaskQueue;
use crate::retry::RetryDecision;

use super::RunCallbacks;

/// Everything a worker loop needs, shared by all workers of one run.
pub(super) struct WorkerContext<P: Prober> {
    pub queue: TaskQueue<P::Output>,
    pub prober: Arc<P>,
    pub permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
    pub callbacks: RunCallbacks<P::Output>,
    pub probe_timeout: Duration,
    pub idle_wait: Duration,
}

impl<P: Prober> WorkerContext<P> {
    /// Dispatch loop. Exits once the queue drains or the run is cancelled.
    pub async fn run(self: Arc<Self>, worker: usize) {
        debug!(worker, "worker started");
        let mut handled = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            // Register for wake-ups before looking at the queue so a mutation
            // between the check and the wait is not missed.
            let changed = self.queue.changed().notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match self.queue.dequeue_next() {
                Some(task) => {
                    self.execute(worker, task).await;
                    drop(permit);
                    handled += 1;
                }
                None => {
                    drop(permit);
                    if self.queue.is_drained() {
                        break;
                    }
                    let wait = self.idle_duration();
                    trace!(worker, ?wait, "nothing dispatchable, waiting");
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        debug!(worker, handled, "worker stopped");
    }

    /// Until the next retry is due, capped at the idle wait.
    fn idle_duration(&self) -> Duration {
        match self.queue.next_retry_at() {
            Some(at) => at.saturating_duration_since(Instant::now()).min(self.idle_wait),
            None => self.idle_wait,
        }
    }

    async fn execute(&self, worker: usize, task: Task<P::Output>) {
        let url = task.url;
        debug!(worker, url = %url, attempt = task.attempts, "probing");

        let attempt = AssertUnwindSafe(self.prober.probe(&url, self.cancel.child_token()))
            .catch_unwind()
            .map(|res| res.unwrap_or_else(|payload| Err(panic_error(payload))));

        let outcome = tokio::select! {
            res = tokio::time::timeout(self.probe_timeout, attempt) => {
                res.unwrap_or(Err(ProbeError::Timeout(self.probe_timeout)))
            }
            _ = self.cancel.cancelled() => Err(ProbeError::Cancelled),
        };

        if let Err(ProbeError::Panicked(msg)) = &outcome {
            warn!(worker, url = %url, panic = %msg, "prober panicked");
        }

        match outcome {
            Ok(result) => {
                if self.queue.mark_completed(&url, result).is_ok() {
                    if let Some(done) = self.queue.get(&url) {
                        self.callbacks.result(&done);
                    }
                }
            }
            Err(ProbeError::Cancelled) if self.cancel.is_cancelled() => {
                if self.queue.release(&url).is_ok() {
                    debug!(worker, url = %url, "probe abandoned on cancellation");
                }
            }
            Err(e) => {
                if let Ok(RetryDecision::GiveUp) = self.queue.mark_failed(&url, e.to_string()) {
                    if let Some(failed) = self.queue.get(&url) {
                        self.callbacks.error(&failed);
                    }
                }
            }
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> ProbeError {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    ProbeError::Panicked(msg)
}

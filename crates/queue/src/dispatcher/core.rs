use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sitescan_core::{ScanError, SchedulerConfig};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

use crate::bus::Subscription;
use crate::events::{ErrorEvent, EventKind, QueueEvent};
use crate::progress::{StatusSink, StatusTicker};
use crate::prober::Prober;
use crate::queue::TaskQueue;
use crate::stats::QueueStats;

use super::worker::WorkerContext;
use super::{RunCallbacks, RunSummary};

/// Runs a [`Prober`] over every queued URL with bounded concurrency.
///
/// A dispatcher owns its queue handle and prober. Runs are sequential:
/// starting a second run while one is active is an error.
pub struct Dispatcher<P: Prober> {
    queue: TaskQueue<P::Output>,
    prober: Arc<P>,
    permits: Arc<Semaphore>,
    cancel: Mutex<CancellationToken>,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<P: Prober> Dispatcher<P> {
    /// Create a dispatcher with a fresh queue.
    pub fn new(config: SchedulerConfig, prober: P) -> Result<Self, ScanError> {
        Ok(Self::with_queue(TaskQueue::new(config)?, prober))
    }

    /// Create a dispatcher over an existing queue handle.
    pub fn with_queue(queue: TaskQueue<P::Output>, prober: P) -> Self {
        Self::with_shared_prober(queue, Arc::new(prober))
    }

    /// Create a dispatcher whose prober is also held elsewhere.
    pub fn with_shared_prober(queue: TaskQueue<P::Output>, prober: Arc<P>) -> Self {
        let permits = Arc::new(Semaphore::new(queue.config().max_concurrent));
        Self {
            queue,
            prober,
            permits,
            cancel: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Submit `urls`, probe them all and wait for the queue to drain.
    ///
    /// Task failures never abort the run; they show up in the summary. An
    /// error is returned only if the prober fails to initialize (before any
    /// dispatch) or if another run is already active.
    pub async fn run<I, S>(
        &self,
        urls: I,
        callbacks: RunCallbacks<P::Output>,
    ) -> Result<RunSummary<P::Output>, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ScanError::RunInProgress);
        }
        let _guard = RunGuard(&self.running);
        let started = Instant::now();
        let cancel = self.fresh_token();

        if let Err(e) = self.prober.initialize().await {
            error!(error = %e, "prober failed to initialize, aborting run");
            self.queue.events().publish(QueueEvent::Error(ErrorEvent {
                message: e.to_string(),
                url: None,
            }));
            return Err(ScanError::Startup(e.to_string()));
        }

        let config = self.queue.config();
        let run_id = self.queue.begin_run();
        let added = self.queue.submit(urls);
        info!(
            %run_id,
            added,
            queued = self.queue.len(),
            workers = config.max_concurrent,
            "run started"
        );
        self.queue.check_drain();

        let ticker = config.enable_short_status.then(|| {
            let queue = self.queue.clone();
            let sink = callbacks.status_sink().unwrap_or_else(log_status_sink);
            StatusTicker::start(config.status_update_interval(), move || queue.stats(), sink)
        });

        let ctx = Arc::new(WorkerContext {
            queue: self.queue.clone(),
            prober: Arc::clone(&self.prober),
            permits: Arc::clone(&self.permits),
            cancel: cancel.clone(),
            callbacks,
            probe_timeout: config.probe_timeout(),
            idle_wait: config.idle_wait(),
        });

        let mut workers = JoinSet::new();
        for worker in 0..config.max_concurrent {
            let span = tracing::debug_span!("worker", %run_id, worker);
            workers.spawn(Arc::clone(&ctx).run(worker).instrument(span));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task panicked");
            }
        }

        if let Some(ticker) = ticker {
            ticker.stop().await;
        }
        self.prober.shutdown().await;

        let (completed, failed) = self.queue.run_archives();
        let summary = RunSummary {
            run_id,
            completed,
            failed,
            stats: self.queue.stats(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            cancelled: cancel.is_cancelled(),
        };
        info!(
            %run_id,
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        Ok(summary)
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        token
    }

    /// Stop dispatching and cancel in-flight probes of the current run.
    ///
    /// Interrupted tasks go back to Pending. `run` still returns a summary,
    /// flagged as cancelled.
    pub fn cancel(&self) {
        info!("run cancellation requested");
        self.cancellation_token().cancel();
    }

    /// Token of the current (or most recent) run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &TaskQueue<P::Output> {
        &self.queue
    }

    pub fn prober(&self) -> &Arc<P> {
        &self.prober
    }

    /// Queue URLs without starting a run.
    pub fn submit<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queue.submit(urls)
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.queue.subscribe(kind, handler)
    }
}

fn log_status_sink() -> StatusSink {
    Arc::new(|line: &str| info!(target: "sitescan::status", "{line}"))
}

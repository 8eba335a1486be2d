//! End-to-end runs of the dispatcher against scripted probers.
//!
//! These cover the externally observable guarantees: bounded concurrency,
//! the retry law, priority dispatch order and progress reporting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sitescan_core::{SchedulerConfig, TaskStatus};
use sitescan_queue::{
    Dispatcher, EventKind, ProbeError, Prober, QueueEvent, RunCallbacks, TaskQueue,
};

/// Fails every URL listed in `always_fail`; otherwise answers with the URL length.
struct ScriptedProber {
    delay: Duration,
    always_fail: Vec<&'static str>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedProber {
    fn new(delay_ms: u64, always_fail: Vec<&'static str>) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            always_fail,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    type Output = usize;

    async fn probe(&self, url: &str, _cancel: CancellationToken) -> Result<usize, ProbeError> {
        *self.attempts.lock().unwrap().entry(url.to_string()).or_default() += 1;
        tokio::time::sleep(self.delay).await;
        if self.always_fail.iter().any(|u| *u == url) {
            Err(ProbeError::failed("connection refused"))
        } else {
            Ok(url.len())
        }
    }
}

fn base_config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_max_concurrent(max_concurrent)
        .with_idle_wait(Duration::from_millis(10))
        .with_short_status(false)
        .with_resource_sampling(false)
}

#[tokio::test]
async fn scenario_a_all_succeed() {
    let d = Dispatcher::new(base_config(2), ScriptedProber::new(5, vec![])).unwrap();
    let urls = ["/1", "/2", "/3", "/4", "/5"];
    let summary = d.run(urls, RunCallbacks::new()).await.unwrap();

    assert_eq!(summary.completed.len(), 5);
    assert!(summary.failed.is_empty());

    let stats = d.stats();
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 0);
    assert!(stats.is_drained());
    for task in &summary.completed {
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.result, Some(2));
    }
}

#[tokio::test]
async fn scenario_b_one_url_exhausts_retries() {
    let config = base_config(2)
        .with_max_retries(1)
        .with_retry_delay(Duration::from_millis(50));
    let d = Dispatcher::new(config, ScriptedProber::new(1, vec!["/down"])).unwrap();

    let started = Instant::now();
    let summary = d
        .run(["/up", "/down", "/also-up"], RunCallbacks::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(summary.completed.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].url, "/down");
    assert_eq!(summary.failed[0].attempts, 2);
    assert_eq!(summary.failed[0].error, "connection refused");
    assert_eq!(d.prober().attempts.lock().unwrap()["/down"], 2);
}

#[tokio::test]
async fn retry_law_with_two_retries() {
    let config = base_config(1)
        .with_max_retries(2)
        .with_retry_delay(Duration::from_millis(5));
    let d = Dispatcher::new(config, ScriptedProber::new(1, vec!["/flaky"])).unwrap();
    let summary = d.run(["/flaky"], RunCallbacks::new()).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].attempts, 3);
    assert_eq!(d.queue().failed().len(), 1);
    assert_eq!(d.queue().get("/flaky").unwrap().status, TaskStatus::Failed);
}

#[tokio::test]
async fn scenario_c_progress_is_monotonic_and_ends_at_100() {
    let config = base_config(3)
        .with_max_retries(1)
        .with_retry_delay(Duration::from_millis(5))
        .with_progress_update_interval(Duration::from_millis(1));
    let d = Dispatcher::new(config, ScriptedProber::new(3, vec!["/p/3"])).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = d.subscribe(EventKind::ProgressUpdate, move |event| {
        if let QueueEvent::ProgressUpdate(stats) = event {
            sink.lock().unwrap().push(stats.progress);
        }
    });

    let urls: Vec<String> = (0..10).map(|i| format!("/p/{i}")).collect();
    let summary = d.run(urls, RunCallbacks::new()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(
        seen.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {seen:?}"
    );
    assert_eq!(summary.stats.progress, 100.0);
    assert_eq!(summary.stats.completed + summary.stats.failed, summary.stats.total);
}

#[tokio::test]
async fn active_workers_never_exceed_limit() {
    let queue: TaskQueue<usize> = TaskQueue::new(base_config(2)).unwrap();
    let peak = Arc::new(AtomicUsize::new(0));

    let observer = queue.clone();
    let max_seen = peak.clone();
    let _sub = queue.subscribe(EventKind::TaskStarted, move |_| {
        max_seen.fetch_max(observer.active_count(), Ordering::SeqCst);
    });

    let d = Dispatcher::with_queue(queue, ScriptedProber::new(5, vec![]));
    let urls: Vec<String> = (0..10).map(|i| format!("/w/{i}")).collect();
    d.run(urls, RunCallbacks::new()).await.unwrap();

    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak active workers was {peak}");
}

#[tokio::test]
async fn dispatch_follows_priority_then_submission() {
    let config = base_config(1).with_priority_pattern("/home", 10);
    let d = Dispatcher::new(config, ScriptedProber::new(1, vec![])).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = order.clone();
    let _sub = d.subscribe(EventKind::TaskStarted, move |event| {
        if let Some(url) = event.url() {
            sink.lock().unwrap().push(url.to_string());
        }
    });

    d.run(["/a", "/home", "/b"], RunCallbacks::new()).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["/home", "/a", "/b"]);
}

#[tokio::test]
async fn resubmitting_across_runs_is_a_no_op() {
    let d = Dispatcher::new(base_config(2), ScriptedProber::new(1, vec![])).unwrap();
    d.run(["/a", "/b"], RunCallbacks::new()).await.unwrap();

    let summary = d.run(["/a", "/b"], RunCallbacks::new()).await.unwrap();
    assert!(summary.completed.is_empty());
    assert_eq!(d.queue().stats().total, 2);
    assert_eq!(d.prober().attempts.lock().unwrap().values().sum::<u32>(), 2);
}

#[tokio::test]
async fn async_consumers_can_follow_the_channel() {
    let d = Dispatcher::new(base_config(2), ScriptedProber::new(1, vec![])).unwrap();
    let mut rx = d.queue().events().channel();

    d.run(["/x", "/y"], RunCallbacks::new()).await.unwrap();

    let mut completed = 0;
    while let Ok(event) = rx.try_recv() {
        match event.kind() {
            EventKind::TaskCompleted => completed += 1,
            EventKind::QueueEmpty => break,
            _ => {}
        }
    }
    assert_eq!(completed, 2);
}

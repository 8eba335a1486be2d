//! Priority URL-probe scheduling: a task queue with retries, a bounded
//! worker pool, progress events and resource sampling.

pub mod bus;
pub mod dispatcher;
pub mod events;
pub mod monitor;
pub mod prober;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod stats;

pub use bus::{EventBus, EventHandler, Subscription};
pub use dispatcher::{Dispatcher, RunCallbacks, RunSummary, TaskCallback};
pub use events::{EventKind, QueueEvent};
pub use monitor::{ResourceMonitor, ResourceSample};
pub use prober::{ProbeError, Prober};
pub use progress::{format_status_line, ProgressThrottle, StatusSink, StatusTicker};
pub use queue::TaskQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use stats::QueueStats;

pub use tokio_util::sync::CancellationToken;

//! Dispatcher -- a fixed pool of async workers draining a [`TaskQueue`].
//!
//! Split into focused submodules:
//! - `core`: Dispatcher struct, run lifecycle and accessors
//! - `worker`: the per-worker dispatch loop and probe execution
//! - `callbacks`: caller hooks and the run summary
//!
//! [`TaskQueue`]: crate::queue::TaskQueue

mod callbacks;
mod core;
mod worker;

pub use self::callbacks::{RunCallbacks, RunSummary, TaskCallback};
pub use self::core::Dispatcher;

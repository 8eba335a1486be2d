//! Priority task queue -- the single owner of task state.
//!
//! Split into focused submodules:
//! - `core`: TaskQueue struct, submission, stats and accessors
//! - `transitions`: dequeue, completion, failure/retry and release
//! - `state`: the lock-protected live set and archives

mod core;
mod state;
mod transitions;

pub use self::core::TaskQueue;

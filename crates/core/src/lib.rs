pub mod config;
pub mod error;
pub mod task;

pub use config::{load_dotenv, PriorityPattern, RetryBackoff, SchedulerConfig};
pub use error::ScanError;
pub use task::{FailedTask, Task, TaskStatus};

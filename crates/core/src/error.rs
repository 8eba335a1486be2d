use thiserror::Error;

use crate::task::TaskStatus;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("duplicate task: {0}")]
    DuplicateTask(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("cannot {op} task {url} in state {from}")]
    InvalidTransition {
        url: String,
        from: TaskStatus,
        op: &'static str,
    },

    #[error("prober failed to start: {0}")]
    Startup(String),

    #[error("a run is already in progress")]
    RunInProgress,

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl ScanError {
    /// Caller mistakes, as opposed to runtime failures.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidConfig(_)
                | ScanError::DuplicateTask(_)
                | ScanError::UnknownTask(_)
                | ScanError::InvalidTransition { .. }
                | ScanError::RunInProgress
        )
    }
}

//! The pluggable unit of work a dispatcher runs against each URL.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a single probe attempt did not produce a result.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Failed(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe cancelled")]
    Cancelled,

    #[error("prober initialization failed: {0}")]
    Init(String),

    #[error("prober panicked: {0}")]
    Panicked(String),
}

impl ProbeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Something that can check a URL and report what it found.
///
/// `initialize` runs once before any task is dispatched; an error there
/// aborts the run. `probe` is called concurrently from several workers and
/// should return promptly once `cancel` fires.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    async fn initialize(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn probe(&self, url: &str, cancel: CancellationToken) -> Result<Self::Output, ProbeError>;

    /// Called once after the last worker has exited.
    async fn shutdown(&self) {}
}

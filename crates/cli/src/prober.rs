//! HTTP implementation of [`Prober`]: one GET per URL.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitescan_queue::{CancellationToken, ProbeError, Prober};
use tracing::debug;

/// What a successful probe observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpReport {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub content_length: Option<u64>,
    pub elapsed_ms: u64,
}

/// Probes URLs with a shared `reqwest` client built on initialize.
pub struct HttpProber {
    user_agent: String,
    connect_timeout: Duration,
    client: OnceLock<reqwest::Client>,
}

impl HttpProber {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            user_agent: format!("sitescan/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::Client, ProbeError> {
        self.client
            .get()
            .ok_or_else(|| ProbeError::failed("HTTP client not initialized"))
    }
}

#[async_trait]
impl Prober for HttpProber {
    type Output = HttpReport;

    async fn initialize(&self) -> Result<(), ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ProbeError::Init(e.to_string()))?;
        // A second run keeps the existing client.
        let _ = self.client.set(client);
        Ok(())
    }

    async fn probe(&self, url: &str, cancel: CancellationToken) -> Result<HttpReport, ProbeError> {
        let client = self.client()?;
        let started = Instant::now();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            res = client.get(url).send() => res.map_err(|e| ProbeError::failed(describe(&e)))?,
        };

        let status = response.status();
        debug!(url, status = status.as_u16(), "probe response");
        if !status.is_success() {
            return Err(ProbeError::failed(format!("HTTP {status}")));
        }

        Ok(HttpReport {
            status: status.as_u16(),
            final_url: response.url().to_string(),
            content_length: response.content_length(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_before_initialize_fails() {
        let prober = HttpProber::new(Duration::from_secs(1));
        let err = prober
            .probe("http://127.0.0.1:9/", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn cancelled_probe_returns_cancelled() {
        let prober = HttpProber::new(Duration::from_secs(1));
        prober.initialize().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = prober.probe("http://10.255.255.1/", cancel).await.unwrap_err();
        assert!(matches!(err, ProbeError::Cancelled));
    }

    #[tokio::test]
    async fn initialize_is_repeatable() {
        let prober = HttpProber::new(Duration::from_secs(1));
        prober.initialize().await.unwrap();
        prober.initialize().await.unwrap();
        assert!(prober.client().is_ok());
    }
}

use async_trait::async_trait;
use resilience::{with_retry, RetryConfig};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe returned status {0}")]
    Status(u16),

    #[error("probe request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Single health probe attempt against a playback URL.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<(), ProbeError>;
}

/// `HEAD` probe; only `200 OK` counts as healthy.
pub struct HttpHealthProbe {
    http: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        let response = self.http.head(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            other => Err(ProbeError::Status(other.as_u16())),
        }
    }
}

/// Probe `url` until it answers healthy or the retry budget runs out.
pub async fn probe_with_retry(probe: &dyn HealthProbe, url: &str, retry: &RetryConfig) -> bool {
    match with_retry(retry, || probe.probe(url)).await {
        Ok(()) => true,
        Err(e) => {
            debug!(url, attempts = e.attempts(), error = %e, "probe budget exhausted");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` attempts, then succeeds.
    struct FlakyProbe {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        async fn probe(&self, _url: &str) -> Result<(), ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ProbeError::Status(503))
            } else {
                Ok(())
            }
        }
    }

    fn budget() -> RetryConfig {
        RetryConfig::fixed(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let probe = FlakyProbe {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        assert!(probe_with_retry(&probe, "http://pull/live/room_1.flv", &budget()).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unhealthy_when_every_attempt_fails() {
        let probe = FlakyProbe {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        assert!(!probe_with_retry(&probe, "http://pull/live/room_1.flv", &budget()).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }
}

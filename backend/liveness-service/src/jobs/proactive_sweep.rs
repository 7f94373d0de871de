//! Proactive Liveness Sweep
//!
//! Backstop for missed or corrupt expiration events. On a fixed cadence, and
//! independently per backend, every session older than the staleness
//! threshold is probed on its playback URL; sessions that stay unhealthy
//! through the retry budget are torn down.
//!
//! Sessions younger than the threshold are still warming up and skipped.

use futures::future::join_all;
use resilience::RetryConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::drain_in_flight;

use crate::db::SessionRepository;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{BackendKind, HealthCheckResult, LiveSession};
use crate::services::{
    probe_with_retry, BackendRegistry, HealthProbe, SessionTeardown, StreamingBackend,
    REMARK_UNHEALTHY,
};

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval: Duration,
    pub stale_after: Duration,
    pub probe_retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub backend: BackendKind,
    pub checked: usize,
    pub unhealthy: Vec<i64>,
    pub removed: u64,
}

pub struct ProactiveReconciler {
    repo: Arc<dyn SessionRepository>,
    backends: BackendRegistry,
    probe: Arc<dyn HealthProbe>,
    teardown: SessionTeardown,
    settings: SweepSettings,
}

impl ProactiveReconciler {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        backends: BackendRegistry,
        probe: Arc<dyn HealthProbe>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            teardown: SessionTeardown::new(repo.clone()),
            repo,
            backends,
            probe,
            settings,
        }
    }

    /// One sweep loop per registered backend.
    pub fn spawn_all(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        self.backends
            .kinds()
            .into_iter()
            .map(|backend| {
                let this = Arc::clone(self);
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move { this.run(backend, shutdown_rx).await })
            })
            .collect()
    }

    /// Fixed-interval loop for one backend.
    ///
    /// Each tick's sweep runs on its own task, so a sweep slowed by its
    /// upstream never delays the next tick. Overlapping sweeps are harmless
    /// because teardown is idempotent. Sweeps still running at shutdown get
    /// a bounded grace period before they are aborted.
    pub async fn run(self: Arc<Self>, backend: BackendKind, mut shutdown: broadcast::Receiver<()>) {
        let mut timer = interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // first tick completes immediately

        info!(
            backend = %backend,
            interval_secs = self.settings.interval.as_secs(),
            stale_after_secs = self.settings.stale_after.as_secs(),
            "Starting liveness sweep loop"
        );

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move { this.run_once(backend).await });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(backend = %backend, error = %e, "Liveness sweep task failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!(backend = %backend, "Received shutdown signal, stopping sweep loop");
                    break;
                }
            }
        }

        drain_in_flight("Liveness sweep", in_flight).await;
    }

    async fn run_once(&self, backend: BackendKind) {
        let started = Instant::now();

        match self.sweep(backend).await {
            Ok(report) => {
                metrics::record_sweep(backend.as_str(), "success", started.elapsed());
                info!(
                    backend = %backend,
                    checked = report.checked,
                    unhealthy = report.unhealthy.len(),
                    removed = report.removed,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Liveness sweep completed"
                );
            }
            Err(e) => {
                metrics::record_sweep(backend.as_str(), "error", started.elapsed());
                error!(
                    backend = %backend,
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Liveness sweep failed"
                );
            }
        }
    }

    /// Probe every stale session of `backend` and tear down the unhealthy ones.
    pub async fn sweep(&self, backend: BackendKind) -> Result<SweepReport> {
        let upstream = self.backends.get(backend).ok_or_else(|| {
            AppError::Config(format!("no streaming backend registered for {}", backend))
        })?;

        let sessions = self
            .repo
            .find_sessions_older_than(backend, self.settings.stale_after)
            .await?;

        if sessions.is_empty() {
            debug!(backend = %backend, "No stale sessions to verify");
            return Ok(SweepReport {
                backend,
                checked: 0,
                unhealthy: Vec::new(),
                removed: 0,
            });
        }

        let results = join_all(
            sessions
                .iter()
                .map(|session| self.check_session(upstream.as_ref(), session)),
        )
        .await;

        let unhealthy: Vec<i64> = results
            .iter()
            .filter(|result| !result.healthy)
            .map(|result| result.session_id)
            .collect();

        let removed = if unhealthy.is_empty() {
            0
        } else {
            warn!(
                backend = %backend,
                session_ids = ?unhealthy,
                "Sessions failed health verification"
            );
            self.teardown.teardown(&unhealthy, REMARK_UNHEALTHY).await?
        };

        Ok(SweepReport {
            backend,
            checked: results.len(),
            unhealthy,
            removed,
        })
    }

    pub async fn check_session(
        &self,
        upstream: &dyn StreamingBackend,
        session: &LiveSession,
    ) -> HealthCheckResult {
        let url = upstream.playback_url(session.room_id);
        let healthy = probe_with_retry(self.probe.as_ref(), &url, &self.settings.probe_retry).await;
        metrics::record_probe(upstream.kind().as_str(), healthy);

        if !healthy {
            debug!(
                session_id = session.id,
                room_id = session.room_id,
                url = %url,
                "Playback probe unhealthy"
            );
        }

        HealthCheckResult {
            session_id: session.id,
            healthy,
        }
    }
}

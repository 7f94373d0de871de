//! Reactive reconciliation
//!
//! Consumes the key-expiration feed. Every expired liveness key triggers a
//! fresh liveness query against the owning backend:
//! - live (or the query itself failed) → re-arm the hint
//! - not live → tear the session down
//!
//! Each event is handled in its own task so a slow backend never stalls the
//! feed, and a failing handler never ends the loop.

use redis_utils::{HintStore, StoreEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::drain_in_flight;
use crate::db::SessionRepository;
use crate::error::Result;
use crate::metrics;
use crate::services::liveness_key::{self, LivenessKey};
use crate::services::{BackendRegistry, LogSink, SessionTeardown, REMARK_UNHEALTHY};

const HINT_VALUE: &str = "1";

#[derive(Debug, Clone)]
pub struct ReactiveSettings {
    /// TTL given to a re-armed hint; also the duration credited per confirmation.
    pub rearm_ttl: Duration,
    /// Channel carrying log-write events.
    pub log_channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Not a liveness key, or no backend registered for it.
    Ignored,
    /// Liveness namespace but undecodable.
    Corrupt,
    /// Hint re-armed; `confirmed_live` is false when the liveness query failed.
    Rearmed { confirmed_live: bool },
    /// Backend reported not live; `removed` sessions were still present.
    TornDown { removed: u64 },
}

impl ExpiryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExpiryOutcome::Ignored => "ignored",
            ExpiryOutcome::Corrupt => "corrupt",
            ExpiryOutcome::Rearmed {
                confirmed_live: true,
            } => "rearmed",
            ExpiryOutcome::Rearmed {
                confirmed_live: false,
            } => "inconclusive",
            ExpiryOutcome::TornDown { .. } => "torn_down",
        }
    }
}

pub struct ReactiveReconciler {
    store: Arc<dyn HintStore>,
    backends: BackendRegistry,
    repo: Arc<dyn SessionRepository>,
    teardown: SessionTeardown,
    log_sink: Arc<dyn LogSink>,
    settings: ReactiveSettings,
}

impl ReactiveReconciler {
    pub fn new(
        store: Arc<dyn HintStore>,
        backends: BackendRegistry,
        repo: Arc<dyn SessionRepository>,
        log_sink: Arc<dyn LogSink>,
        settings: ReactiveSettings,
    ) -> Self {
        Self {
            store,
            backends,
            teardown: SessionTeardown::new(repo.clone()),
            repo,
            log_sink,
            settings,
        }
    }

    /// Read the feed until it closes or shutdown is signalled.
    ///
    /// Handlers still running at that point get a bounded grace period.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<StoreEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            rearm_ttl_secs = self.settings.rearm_ttl.as_secs(),
            log_channel = %self.settings.log_channel,
            "Starting reactive reconciler"
        );

        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch(&mut in_flight, event),
                    None => {
                        warn!("Keyspace feed closed, stopping reactive reconciler");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Expiration handler task failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown signal, stopping reactive reconciler");
                    break;
                }
            }
        }

        drain_in_flight("Expiration handler", in_flight).await;
    }

    /// Handle one event on its own task in `in_flight`; errors stop at the
    /// task boundary.
    pub fn dispatch(self: &Arc<Self>, in_flight: &mut JoinSet<()>, event: StoreEvent) {
        in_flight.spawn(Arc::clone(self).handle_event(event));
    }

    async fn handle_event(self: Arc<Self>, event: StoreEvent) {
        match event {
            StoreEvent::KeyExpired { key } => match self.handle_expired(&key).await {
                Ok(outcome) => metrics::record_expiration(outcome.label()),
                Err(e) => {
                    metrics::record_expiration("error");
                    error!(key = %key, error = %e, "Failed to reconcile expired key");
                }
            },
            StoreEvent::Message { channel, payload } => {
                if channel != self.settings.log_channel {
                    debug!(channel = %channel, "Ignoring message on unexpected channel");
                    return;
                }
                if let Err(e) = self.log_sink.write(&channel, &payload).await {
                    warn!(channel = %channel, error = %e, "Log sink rejected event");
                }
            }
        }
    }

    /// Reconcile one expired key.
    pub async fn handle_expired(&self, raw: &str) -> Result<ExpiryOutcome> {
        let Some(namespace) = liveness_key::classify(raw) else {
            debug!(key = raw, "Expired key outside liveness namespaces");
            return Ok(ExpiryOutcome::Ignored);
        };
        if namespace.backend().is_none() {
            debug!(key = raw, ?namespace, "Expired key handled elsewhere");
            return Ok(ExpiryOutcome::Ignored);
        }

        let key = match liveness_key::decode(namespace, raw) {
            Ok(key) => key,
            Err(e) => {
                warn!(key = raw, error = %e, "Dropping corrupt liveness key");
                return Ok(ExpiryOutcome::Corrupt);
            }
        };

        let Some(backend) = self.backends.get(key.backend) else {
            warn!(key = %key, backend = %key.backend, "No backend registered for expired key");
            return Ok(ExpiryOutcome::Ignored);
        };

        match backend.is_live(key.room_id).await {
            Ok(true) => {
                self.rearm(&key).await;
                self.credit_duration(&key).await;
                debug!(key = %key, "Session still live, hint re-armed");
                Ok(ExpiryOutcome::Rearmed {
                    confirmed_live: true,
                })
            }
            Ok(false) => {
                info!(key = %key, room_id = key.room_id, "Session no longer live, tearing down");
                let removed = self.teardown.teardown_key(&key, REMARK_UNHEALTHY).await?;
                Ok(ExpiryOutcome::TornDown { removed })
            }
            Err(e) => {
                warn!(
                    key = %key,
                    room_id = key.room_id,
                    error = %e,
                    "Liveness query failed, re-arming for another check"
                );
                self.rearm(&key).await;
                Ok(ExpiryOutcome::Rearmed {
                    confirmed_live: false,
                })
            }
        }
    }

    /// Best effort: a failed re-arm leaves the scheduled sweep as backstop.
    async fn rearm(&self, key: &LivenessKey) {
        if let Err(e) = self
            .store
            .set_ex(&key.encode(), HINT_VALUE, self.settings.rearm_ttl)
            .await
        {
            warn!(key = %key, error = %e, "Failed to re-arm liveness hint");
        }
    }

    async fn credit_duration(&self, key: &LivenessKey) {
        if let Err(e) = self
            .repo
            .extend_duration(key.record_id, self.settings.rearm_ttl.as_secs())
            .await
        {
            warn!(key = %key, record_id = key.record_id, error = %e, "Failed to extend record duration");
        }
    }
}

//! Background reconciliation tasks
//!
//! Two independent drivers converge on the same teardown:
//! - reactive: expired liveness hints from the keyspace feed
//! - proactive: fixed-interval sweep per backend

pub mod proactive_sweep;
pub mod reactive_reconciler;

pub use proactive_sweep::{ProactiveReconciler, SweepReport, SweepSettings};
pub use reactive_reconciler::{ExpiryOutcome, ReactiveReconciler, ReactiveSettings};

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period for per-event and per-tick tasks once a loop stops. Shorter
/// than [`SHUTDOWN_TIMEOUT`] so the loop itself still exits in time.
pub(crate) const DRAIN_TIMEOUT: Duration = Duration::from_secs(4);

/// Background task handles for graceful shutdown
pub struct BackgroundTasks {
    pub feed_handle: JoinHandle<()>,
    pub reactive_handle: JoinHandle<()>,
    pub sweep_handles: Vec<JoinHandle<()>>,
}

/// Signal every loop to stop, then wait for each one.
///
/// The feed subscriber has no shutdown hook and is aborted.
pub async fn shutdown_background_tasks(tasks: BackgroundTasks, shutdown: &broadcast::Sender<()>) {
    tracing::info!("Shutting down background tasks...");

    // No receivers left just means every loop already stopped.
    let _ = shutdown.send(());

    await_task("Reactive reconciler", tasks.reactive_handle).await;
    for handle in tasks.sweep_handles {
        await_task("Liveness sweep", handle).await;
    }

    tasks.feed_handle.abort();
    await_task("Keyspace feed", tasks.feed_handle).await;

    tracing::info!("All background tasks shut down complete");
}

/// Wait for in-flight tasks up to [`DRAIN_TIMEOUT`], then abort the rest.
pub(crate) async fn drain_in_flight(name: &str, mut in_flight: JoinSet<()>) {
    if in_flight.is_empty() {
        return;
    }
    let pending = in_flight.len();

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "{} task failed", name);
            }
        }
    })
    .await;

    match drained {
        Ok(()) => tracing::info!(pending, "{} tasks finished before shutdown", name),
        Err(_) => {
            tracing::warn!(
                remaining = in_flight.len(),
                "{} tasks still running at shutdown, aborting",
                name
            );
            in_flight.abort_all();
        }
    }
}

async fn await_task(name: &str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => tracing::info!("{} shut down gracefully", name),
        Ok(Err(_)) => tracing::info!("{} aborted", name),
        Err(_) => {
            tracing::warn!("{} did not shut down within timeout", name);
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_stops_loops_and_aborts_feed() {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let mut rx = shutdown_tx.subscribe();
        let reactive_handle = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        let mut rx = shutdown_tx.subscribe();
        let sweep_handle = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        let feed_handle = tokio::spawn(std::future::pending::<()>());

        let tasks = BackgroundTasks {
            feed_handle,
            reactive_handle,
            sweep_handles: vec![sweep_handle],
        };

        tokio::time::timeout(
            Duration::from_secs(1),
            shutdown_background_tasks(tasks, &shutdown_tx),
        )
        .await
        .expect("shutdown should complete");
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_finishing_tasks() {
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut in_flight = JoinSet::new();
        let flag = done.clone();
        in_flight.spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        drain_in_flight("Test", in_flight).await;

        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_tasks() {
        let mut in_flight = JoinSet::new();
        in_flight.spawn(std::future::pending::<()>());

        let start = tokio::time::Instant::now();
        drain_in_flight("Test", in_flight).await;

        assert!(start.elapsed() >= DRAIN_TIMEOUT);
    }
}

use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use anyhow::{anyhow, Context};
use redis_utils::{HintStore, KeyspaceSubscriber, RedisHintStore, RedisPool};
use resilience::RetryConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use liveness_service::config::Config;
use liveness_service::db::{PgSessionRepository, SessionRepository};
use liveness_service::jobs::{
    shutdown_background_tasks, BackgroundTasks, ProactiveReconciler, ReactiveReconciler,
    ReactiveSettings, SweepSettings,
};
use liveness_service::metrics;
use liveness_service::services::{
    BackendRegistry, CdnBackend, HealthProbe, HttpHealthProbe, LogSink, RelayBackend,
    TracingLogSink,
};

const FEED_BUFFER: usize = 1024;

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,liveness_service=debug".into());

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        env = %config.app.env,
        port = config.app.port,
        "Starting liveness-service"
    );

    // Database
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
    }

    let repo: Arc<dyn SessionRepository> = Arc::new(PgSessionRepository::new(db_pool));

    // Redis
    let redis_pool = RedisPool::connect(&config.redis.url).await?;
    let store: Arc<dyn HintStore> = Arc::new(
        RedisHintStore::new(redis_pool.manager())
            .with_command_timeout(Duration::from_millis(config.redis.command_timeout_ms)),
    );

    // Upstream backends
    let http = reqwest::Client::builder()
        .timeout(config.reconcile.backend_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let mut backends = BackendRegistry::new();
    if let Some(cdn) = config.cdn.clone() {
        backends.register(Arc::new(CdnBackend::new(http.clone(), cdn)));
    }
    if let Some(relay) = config.relay.clone() {
        backends.register(Arc::new(RelayBackend::new(http.clone(), relay)));
    }
    if backends.is_empty() {
        return Err(anyhow!(
            "No streaming backend configured; set CDN_API_BASE and/or RELAY_API_BASE"
        ));
    }
    info!(backends = ?backends.kinds(), "Streaming backends registered");

    let probe: Arc<dyn HealthProbe> = Arc::new(
        HttpHealthProbe::new(config.reconcile.probe_timeout())
            .context("Failed to build health probe client")?,
    );

    // Keyspace feed
    let keyspace_db = config.redis.keyspace_db.unwrap_or_else(|| redis_pool.db());
    let subscriber = KeyspaceSubscriber::new(&config.redis.url, keyspace_db)
        .context("Failed to create keyspace subscriber")?
        .with_channel(config.redis.log_channel.clone());

    if config.redis.configure_keyspace_events {
        if let Err(e) = subscriber.enable_expiry_notifications().await {
            warn!(error = %e, "Failed to enable keyspace expiry notifications");
        }
    }

    let (events, feed_handle) = subscriber
        .spawn(FEED_BUFFER)
        .await
        .context("Failed to subscribe to keyspace feed")?;

    // Reconcilers
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let log_sink: Arc<dyn LogSink> = Arc::new(TracingLogSink);
    let reactive = Arc::new(ReactiveReconciler::new(
        store,
        backends.clone(),
        repo.clone(),
        log_sink,
        ReactiveSettings {
            rearm_ttl: config.reconcile.hint_rearm_ttl(),
            log_channel: config.redis.log_channel.clone(),
        },
    ));
    let reactive_handle = tokio::spawn(reactive.run(events, shutdown_tx.subscribe()));

    let proactive = Arc::new(ProactiveReconciler::new(
        repo,
        backends,
        probe,
        SweepSettings {
            interval: config.reconcile.sweep_interval(),
            stale_after: config.reconcile.stale_after(),
            probe_retry: RetryConfig::fixed(
                config.reconcile.probe_max_attempts,
                config.reconcile.probe_retry_delay(),
            ),
        },
    ));
    let sweep_handles = proactive.spawn_all(&shutdown_tx);

    let tasks = BackgroundTasks {
        feed_handle,
        reactive_handle,
        sweep_handles,
    };

    // Ops surface
    let bind_addr = format!("{}:{}", config.app.host, config.app.port);
    info!(%bind_addr, "Serving /health and /metrics");

    let server_result = HttpServer::new(|| {
        App::new()
            .wrap(Logger::default())
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics::serve_metrics))
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await;

    shutdown_background_tasks(tasks, &shutdown_tx).await;

    server_result.context("HTTP server error")?;
    info!("liveness-service stopped");
    Ok(())
}

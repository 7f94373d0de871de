use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub cdn: Option<CdnConfig>,
    pub relay: Option<RelayConfig>,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Database whose expirations are watched; defaults to the one in `url`.
    pub keyspace_db: Option<i64>,
    pub log_channel: String,
    pub command_timeout_ms: u64,
    /// Issue `CONFIG SET notify-keyspace-events Ex` at startup.
    pub configure_keyspace_events: bool,
}

/// CDN-push backend (A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    pub api_base: String,
    pub api_token: Option<String>,
    pub pull_base: String,
    pub app: String,
}

/// Self-hosted relay backend (B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub api_base: String,
    pub pull_base: String,
    pub app: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub sweep_interval_secs: u64,
    pub stale_after_secs: u64,
    pub probe_timeout_ms: u64,
    pub probe_max_attempts: u32,
    pub probe_retry_delay_ms: u64,
    pub hint_rearm_ttl_secs: u64,
    pub backend_timeout_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 180,
            stale_after_secs: 180,
            probe_timeout_ms: 2_000,
            probe_max_attempts: 3,
            probe_retry_delay_ms: 500,
            hint_rearm_ttl_secs: 5,
            backend_timeout_ms: 5_000,
        }
    }
}

impl ReconcileConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_delay_ms)
    }

    pub fn hint_rearm_ttl(&self) -> Duration {
        Duration::from_secs(self.hint_rearm_ttl_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = ReconcileConfig::default();

        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("APP_PORT", 8090)?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .map_err(|_| AppError::Config("DATABASE_URL must be set".to_string()))?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                run_migrations: parse_env("RUN_MIGRATIONS", false)?,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                keyspace_db: optional_env("REDIS_KEYSPACE_DB")?,
                log_channel: std::env::var("REDIS_LOG_CHANNEL")
                    .unwrap_or_else(|_| "liveness:log".to_string()),
                command_timeout_ms: parse_env("REDIS_COMMAND_TIMEOUT_MS", 3_000u64)?.max(500),
                configure_keyspace_events: parse_env("ENABLE_KEYSPACE_CONFIG", false)?,
            },
            cdn: match std::env::var("CDN_API_BASE").ok().filter(|v| !v.is_empty()) {
                Some(api_base) => Some(CdnConfig {
                    api_base,
                    api_token: std::env::var("CDN_API_TOKEN").ok().filter(|v| !v.is_empty()),
                    pull_base: std::env::var("CDN_PULL_BASE").map_err(|_| {
                        AppError::Config("CDN_PULL_BASE must be set with CDN_API_BASE".to_string())
                    })?,
                    app: std::env::var("CDN_APP").unwrap_or_else(|_| "live".to_string()),
                }),
                None => None,
            },
            relay: match std::env::var("RELAY_API_BASE").ok().filter(|v| !v.is_empty()) {
                Some(api_base) => Some(RelayConfig {
                    api_base,
                    pull_base: std::env::var("RELAY_PULL_BASE")
                        .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
                    app: std::env::var("RELAY_APP").unwrap_or_else(|_| "live".to_string()),
                }),
                None => None,
            },
            reconcile: ReconcileConfig {
                sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
                stale_after_secs: parse_env("SWEEP_STALE_AFTER_SECS", defaults.stale_after_secs)?,
                probe_timeout_ms: parse_env("PROBE_TIMEOUT_MS", defaults.probe_timeout_ms)?,
                probe_max_attempts: parse_env("PROBE_MAX_ATTEMPTS", defaults.probe_max_attempts)?,
                probe_retry_delay_ms: parse_env(
                    "PROBE_RETRY_DELAY_MS",
                    defaults.probe_retry_delay_ms,
                )?,
                hint_rearm_ttl_secs: parse_env("HINT_REARM_TTL_SECS", defaults.hint_rearm_ttl_secs)?
                    .max(1),
                backend_timeout_ms: parse_env("BACKEND_TIMEOUT_MS", defaults.backend_timeout_ms)?,
            },
        })
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T> {
    Ok(optional_env(name)?.unwrap_or(default))
}

fn optional_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", name, raw))),
        _ => Ok(None),
    }
}

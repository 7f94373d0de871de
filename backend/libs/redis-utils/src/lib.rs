//! Redis building blocks shared by the backend services.
//!
//! - [`RedisPool`]: connection manager bootstrap
//! - [`HintStore`]: the narrow set of atomic commands the services rely on,
//!   with a Redis implementation and an in-memory one for tests
//! - [`DistributedLock`]: `SET NX PX` acquire plus compare-and-delete release
//! - [`KeyspaceSubscriber`]: key-expiration and channel feed as an mpsc stream

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub mod keyspace;
pub mod lock;
pub mod memory;
pub mod store;
pub mod timeout;

pub use keyspace::{KeyspaceSubscriber, StoreEvent};
pub use lock::{DistributedLock, LockError, LockRetry};
pub use memory::MemoryHintStore;
pub use store::{HintStore, RedisHintStore};
pub use timeout::run_with_timeout;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis connection pool backed by a single auto-reconnecting manager.
pub struct RedisPool {
    manager: SharedConnectionManager,
    db: i64,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let info = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let db = info.redis.db;

        let client = Client::open(info).context("failed to construct Redis client")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        info!(db, "Redis connection manager ready");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
            db,
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    /// Logical database index selected by the connection URL.
    pub fn db(&self) -> i64 {
        self.db
    }
}

use async_trait::async_trait;
use redis::RedisResult;
use std::time::Duration;
use tracing::debug;

use crate::timeout::{run_with_timeout, DEFAULT_REDIS_COMMAND_TIMEOUT};
use crate::SharedConnectionManager;

/// Compare-and-delete executed server side so no other client can observe a
/// half-released key.
pub(crate) const COMPARE_AND_DELETE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
"#;

/// Atomic commands used against the shared hint store.
///
/// Every method maps to exactly one server-side operation; callers never
/// compose read-then-write pairs on top of it.
#[async_trait]
pub trait HintStore: Send + Sync {
    /// `SET key value EX ttl` (unconditional overwrite).
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<()>;

    /// `SET key value NX PX ttl`. Returns whether the key was written.
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<bool>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> RedisResult<bool>;
}

/// [`HintStore`] on top of the shared connection manager.
#[derive(Clone)]
pub struct RedisHintStore {
    redis: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisHintStore {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self {
            redis,
            command_timeout: DEFAULT_REDIS_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }
}

#[async_trait]
impl HintStore for RedisHintStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<()> {
        let mut conn = self.redis.lock().await.clone();
        let secs = ttl.as_secs().max(1);

        run_with_timeout(
            self.command_timeout,
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query_async::<_, ()>(&mut conn),
        )
        .await?;

        debug!(key, ttl_secs = secs, "hint set");
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<bool> {
        let mut conn = self.redis.lock().await.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        // Nil reply when the key already exists.
        let reply: Option<String> = run_with_timeout(
            self.command_timeout,
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(millis)
                .query_async(&mut conn),
        )
        .await?;

        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> RedisResult<bool> {
        let mut conn = self.redis.lock().await.clone();

        let deleted: i64 = run_with_timeout(
            self.command_timeout,
            redis::Script::new(COMPARE_AND_DELETE_SCRIPT)
                .key(key)
                .arg(expected)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await?;

        Ok(deleted == 1)
    }
}

use redis::{RedisError, RedisResult};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::HintStore;

/// Attempts made by [`DistributedLock::with_lock`] before giving up.
#[derive(Debug, Clone, Copy)]
pub struct LockRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError<E = Infallible> {
    #[error("lock {key} unavailable after {attempts} attempts")]
    Unavailable { key: String, attempts: u32 },

    #[error("lock store error: {0}")]
    Store(#[from] RedisError),

    #[error("operation failed while holding lock: {0}")]
    Operation(E),
}

/// Mutual exclusion across processes sharing one hint store.
///
/// Every lock carries a TTL; a crashed holder simply lets it expire.
/// Acquisition never blocks, so callers choose their own backoff through
/// [`LockRetry`].
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn HintStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn HintStore>) -> Self {
        Self { store }
    }

    /// Try once to take `key` for `owner_token`.
    ///
    /// `Ok(false)` means someone else holds it; store failures are errors.
    pub async fn acquire(&self, key: &str, owner_token: &str, ttl: Duration) -> Result<bool, LockError> {
        Ok(self.try_acquire(key, owner_token, ttl).await?)
    }

    /// Release `key` if and only if it is still held by `owner_token`.
    ///
    /// Returns `Ok(false)` when the lock already expired or belongs to
    /// another owner.
    pub async fn release(&self, key: &str, owner_token: &str) -> Result<bool, LockError> {
        let released = self.store.compare_and_delete(key, owner_token).await?;
        if !released {
            debug!(key, "lock was no longer held by this owner");
        }
        Ok(released)
    }

    async fn try_acquire(&self, key: &str, owner_token: &str, ttl: Duration) -> RedisResult<bool> {
        let acquired = self.store.set_nx_px(key, owner_token, ttl).await?;
        debug!(key, acquired, ttl_ms = ttl.as_millis() as u64, "lock acquire");
        Ok(acquired)
    }

    /// Run `f` while holding `key`.
    ///
    /// The lock is released on every exit path. If the returned future is
    /// dropped mid-flight (timeout, cancellation, panic) the release is
    /// spawned onto the current runtime.
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        key: &str,
        ttl: Duration,
        retry: LockRetry,
        f: F,
    ) -> Result<T, LockError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = Uuid::new_v4().to_string();
        let attempts = retry.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if self.try_acquire(key, &token, ttl).await? {
                break;
            }
            if attempt >= attempts {
                warn!(key, attempts, "lock unavailable, giving up");
                return Err(LockError::Unavailable {
                    key: key.to_string(),
                    attempts,
                });
            }
            sleep(retry.delay).await;
        }

        let mut guard = ReleaseGuard {
            lock: self.clone(),
            key: key.to_string(),
            token,
            armed: true,
        };

        let result = f().await;
        guard.release().await;

        result.map_err(LockError::Operation)
    }
}

struct ReleaseGuard {
    lock: DistributedLock,
    key: String,
    token: String,
    armed: bool,
}

impl ReleaseGuard {
    async fn release(&mut self) {
        self.armed = false;
        if let Err(e) = self.lock.release(&self.key, &self.token).await {
            warn!(key = %self.key, error = %e, "failed to release lock; it will expire");
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "no runtime to release lock; it will expire");
            return;
        };
        let lock = self.lock.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = lock.release(&key, &token).await {
                warn!(key = %key, error = %e, "deferred lock release failed");
            }
        });
    }
}

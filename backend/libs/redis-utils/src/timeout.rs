use redis::RedisError;
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_REDIS_COMMAND_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Bound a Redis command so a stalled connection surfaces as an `IoError`
/// instead of hanging the caller.
pub async fn run_with_timeout<F, T>(limit: Duration, future: F) -> Result<T, RedisError>
where
    F: std::future::Future<Output = Result<T, RedisError>>,
{
    match timeout(limit, future).await {
        Ok(res) => res,
        Err(_) => Err(RedisError::from((
            redis::ErrorKind::IoError,
            "redis command timed out",
        ))),
    }
}

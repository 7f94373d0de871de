/// Resilience helpers for calls to unreliable upstreams.
///
/// - **Retry**: bounded attempts with optional exponential backoff and jitter
///
/// # Example: probe with a fixed retry budget
///
/// ```rust,no_run
/// use resilience::{with_retry, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::fixed(3, Duration::from_millis(200));
///
///     let result = with_retry(&config, || async {
///         // Your upstream call here
///         Ok::<_, String>(())
///     }).await;
/// }
/// ```

pub mod retry;

pub use retry::{with_retry, RetryConfig, RetryError};

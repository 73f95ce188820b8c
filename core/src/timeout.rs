//! Bounded waits on external calls.

use std::future::Future;
use std::time::Duration;

/// Default bound on a single ephemeral store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on a durable store transaction.
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound on a queue publish.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `future`, mapping an elapsed deadline with `on_timeout`.
///
/// # Errors
///
/// Returns the future's own error, or `on_timeout()` if `limit` elapses first.
pub async fn with_timeout<T, E, F>(
    limit: Duration,
    future: F,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

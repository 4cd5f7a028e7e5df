//! Bounded flushes for teardown paths.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Run `work` for at most `limit`. Returns `None` if it did not finish,
/// in which case it is dropped mid-flight.
pub async fn flush_with_timeout<F, T>(limit: Duration, work: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(limit_ms = limit.as_millis() as u64, "Flush did not finish in time");
            None
        }
    }
}

//! Deadline Racing
//!
//! Every remote operation in the system (protocol handshakes, tool calls,
//! model completions) is raced against a timer. Whichever finishes first
//! wins; the loser is dropped and its outcome discarded.
//!
//! The helpers are generic over the caller's error type so that each crate
//! surfaces expiry through its own `Timeout` variant.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Raised when the timer wins the race
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} timed out after {after:?}")]
pub struct DeadlineExceeded {
    pub operation: String,
    pub after: Duration,
}

/// Race `fut` against a `limit` timer.
pub async fn with_deadline<T, E, F>(operation: &str, limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(operation, ?limit, "Deadline exceeded");
            Err(DeadlineExceeded {
                operation: operation.to_string(),
                after: limit,
            }
            .into())
        }
    }
}

/// Repeatedly run `attempt` until it yields a value or `limit` elapses.
///
/// The attempt returns `Ok(None)` for "not yet"; errors abort the polling
/// immediately.
pub async fn poll_until<T, E, F, Fut>(
    operation: &str,
    limit: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: From<DeadlineExceeded>,
{
    with_deadline(operation, limit, async move {
        loop {
            if let Some(value) = attempt().await? {
                return Ok(value);
            }
            tokio::time::sleep(interval).await;
        }
    })
    .await
}

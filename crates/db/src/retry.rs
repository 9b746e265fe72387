use backoff::{backoff::Backoff, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::StoreError;

fn store_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(1),
        max_elapsed_time: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

/// Run a store operation, retrying transient failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(op: &'static str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = store_backoff();
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => match backoff.next_backoff() {
                Some(delay) => {
                    warn!(op, error = %err, ?delay, "store: transient error, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

/// Retry the staging half of a write, then run `commit` exactly once.
///
/// A commit error may arrive after the server applied the transaction.
/// Commit errors surface to the caller unretried.
pub async fn with_retry_then_commit<S, T, F, Fut, C, CFut>(
    op: &'static str,
    stage: F,
    commit: C,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, StoreError>>,
    C: FnOnce(S) -> CFut,
    CFut: Future<Output = Result<T, StoreError>>,
{
    let staged = with_retry(op, stage).await?;
    commit(staged).await.map_err(|err| {
        warn!(op, error = %err, "store: commit failed, not retrying");
        err
    })
}

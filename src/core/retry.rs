/*!
 * Bounded retry around remote fetches and backend saves
 */

use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use courier_core_interface::{InterfaceError, Storage};
use courier_core_resilience::{with_retry, RetryError, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CourierError, Result};

/// Persist `local_path` at `remote_path`, retrying immediately on failure
///
/// Makes at most `policy.attempts()` calls to [`Storage::save`]. When every
/// attempt fails the last backend error is surfaced in
/// [`CourierError::SaveFailed`]; a cancellation at any point surfaces as
/// [`CourierError::Canceled`].
pub async fn save_with_retry(
    storage: &dyn Storage,
    local_path: &Path,
    remote_path: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcome = with_retry(policy, cancel, |attempt| async move {
        debug!(
            storage = %storage.name(),
            path = %remote_path,
            attempt = attempt + 1,
            "saving file"
        );
        storage.save(local_path, remote_path, cancel).await
    })
    .await;

    match outcome {
        Ok(()) => Ok(()),
        Err(RetryError::Canceled { .. }) => Err(CourierError::Canceled),
        Err(RetryError::Exhausted { last, .. }) if last.is_canceled() => Err(CourierError::Canceled),
        Err(RetryError::Exhausted { attempts, last }) => Err(CourierError::SaveFailed {
            attempts,
            source: last,
        }),
    }
}

/// Run a remote fetch until it succeeds or `policy` is spent
///
/// Each attempt is raced against `cancel`. When every attempt fails the last
/// source error is surfaced in [`CourierError::Fetch`].
pub async fn fetch_with_retry<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut fetch: F,
) -> Result<Bytes>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = courier_core_interface::Result<Bytes>>,
{
    let outcome = with_retry(policy, cancel, |_| {
        let attempt = fetch();
        async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(InterfaceError::Canceled),
                bytes = attempt => bytes,
            }
        }
    })
    .await;

    match outcome {
        Ok(bytes) => Ok(bytes),
        Err(RetryError::Canceled { .. }) => Err(CourierError::Canceled),
        Err(RetryError::Exhausted { last, .. }) if last.is_canceled() => Err(CourierError::Canceled),
        Err(RetryError::Exhausted { last, .. }) => Err(CourierError::Fetch(last)),
    }
}

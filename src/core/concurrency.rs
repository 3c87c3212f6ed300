/*!
 * Concurrency control for bounding in-flight tasks
 *
 * Every worker loop holds one permit for the whole of a dispatch, so
 * downloads, backend writes and terminal notifications are throttled by the
 * same counter.
 */

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A counting semaphore shared by all worker loops
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    /// Limiter with `max_concurrent` slots (at least one)
    pub fn new(max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Wait for a permit; `None` once the limiter has been closed
    pub async fn acquire(&self) -> Option<ConcurrencyPermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| ConcurrencyPermit { _permit: permit })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max
    }

    /// Wake every waiter with `None` and refuse further permits
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Permission to occupy one slot, released on drop
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

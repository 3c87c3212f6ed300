//! Bounded retry without backoff
//!
//! A failed attempt is retried immediately until `max_retries` extra attempts
//! have been spent; the last error is then surfaced unchanged. The
//! cancellation token is checked before every attempt, so an operator cancel
//! never waits for the remaining budget.

use std::fmt::Display;
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How many times a failed operation is re-run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// A policy that runs the operation exactly once
    pub fn none() -> Self {
        Self { max_retries: 0 }
    }

    /// Total attempts this policy allows
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("canceled after {attempts} attempt(s)")]
    Canceled { attempts: u32 },

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Canceled { attempts } | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The last operation error, if the budget ran out
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Canceled { .. } => None,
        }
    }
}

/// Run `op` until it succeeds, the policy is exhausted, or `cancel` fires
///
/// `op` receives the zero-based attempt number.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let total = policy.attempts();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Canceled { attempts: attempt });
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= total {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                warn!(attempt, total, error = %e, "attempt failed, retrying");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_policy_attempts() {
        assert_eq!(RetryPolicy::none().attempts(), 1);
        assert_eq!(RetryPolicy::new(2).attempts(), 3);
        assert_eq!(RetryPolicy::new(u32::MAX).attempts(), u32::MAX);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let result: Result<&str, RetryError<String>> =
            with_retry(&RetryPolicy::new(2), &token, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(format!("fail {}", attempt))
                    } else {
                        Ok("saved")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "saved");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_error() {
        let token = CancellationToken::new();

        let result: Result<(), RetryError<String>> =
            with_retry(&RetryPolicy::new(2), &token, |attempt| async move {
                Err(format!("fail {}", attempt))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_last().as_deref(), Some("fail 2"));
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> =
            with_retry(&RetryPolicy::new(10), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err("interrupted".to_string()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Canceled { attempts: 1 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_canceled_never_runs() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> =
            with_retry(&RetryPolicy::new(3), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unreachable".to_string()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Canceled { attempts: 0 })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

//! Courier Core Resilience: pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! - **Retry**: run a fallible async operation up to a fixed number of extra
//!   attempts, stopping early when a cancellation token fires
//! - **Expiring cache**: short-lived key/value lookups with explicit expiry,
//!   used instead of process-lifetime global maps
//!
//! This crate has no knowledge of storages, remote sources or tasks.
//!
//! # Usage Example
//!
//! ```
//! use courier_core_resilience::retry::{with_retry, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(2);
//! let token = CancellationToken::new();
//! let result: Result<u32, _> = with_retry(&policy, &token, |attempt| async move {
//!     if attempt < 2 { Err("busy") } else { Ok(attempt) }
//! })
//! .await;
//! assert_eq!(result.unwrap(), 2);
//! # }
//! ```

pub mod expiring;
pub mod retry;

pub use expiring::ExpiringCache;
pub use retry::{with_retry, RetryError, RetryPolicy};

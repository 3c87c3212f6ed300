/*!
 * Courier - queued transfers from chat attachments into storage backends
 *
 * Producers submit tasks; a bounded pool of workers then for each task:
 * - resolves the destination from the task's storage and the user's rules
 * - streams the remote object into a local cache in fixed-size chunks
 * - persists the cached file with bounded retries
 * - disposes of the cache file immediately or after a retention period
 * - delivers exactly one terminal notification
 *
 * Concrete backends, the chat client and the rule store are external
 * capabilities; see `courier_core_interface`.
 */

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;
pub mod system;

// Re-export commonly used types
pub use config::{CourierConfig, StorageConfig, UserConfig};
pub use core::{
    CacheCleaner, ChunkedRangeReader, FileLookup, LogSink, Scheduler, StorageRouter,
    TelegraphDownloader, TransferPipeline,
};
pub use error::{CourierError, Result};
pub use storage::{LocalStorage, StorageRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

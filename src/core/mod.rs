/*!
 * Task processing engine
 */

pub mod cleanup;
pub mod concurrency;
pub mod lookup;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod reader;
pub mod retry;
pub mod router;
pub mod rules;
pub mod scheduler;
pub mod telegraph;

pub use cleanup::CacheCleaner;
pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
pub use lookup::FileLookup;
pub use notify::{terminal_message, LogSink};
pub use pipeline::TransferPipeline;
pub use queue::{Cancellation, TaskQueue};
pub use reader::{ChunkedRangeReader, CHUNK_SIZE};
pub use router::{Route, StorageRouter};
pub use scheduler::Scheduler;
pub use telegraph::TelegraphDownloader;

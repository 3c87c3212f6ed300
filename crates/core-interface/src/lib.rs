//! Courier Core Interface: data model and capability seams
//!
//! This crate defines everything the transfer engine needs to know about the
//! outside world, and nothing more:
//!
//! 1. **Model**: [`Task`], [`RemoteFile`], [`Rule`] and the task state machine
//! 2. **Capabilities**: the narrow traits the engine calls into
//!    - [`Storage`]: a destination backend (local disk, WebDAV, object store, ...)
//!    - [`RemoteSource`]: chunk-addressed access to remote objects
//!    - [`Persistence`]: per-user rule lists and originating message text
//!    - [`ProgressSink`]: per-task progress and terminal notifications
//!    - [`TelegraphClient`]: article pages and their embedded images
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_core_interface::{RemoteSource, FileLocation, Result};
//!
//! async fn first_chunk<S: RemoteSource>(source: &S) -> Result<usize> {
//!     let location = FileLocation::new("doc:42");
//!     let bytes = source.fetch_chunk(&location, 0, 1024 * 1024).await?;
//!     Ok(bytes.len())
//! }
//! ```
//!
//! Implementations must be `Send + Sync`: the engine shares them across all
//! worker loops behind `Arc`.

pub mod model;

pub use model::{
    page_slug, FileLocation, Node, NodeElement, RemoteFile, Rule, RuleType, StorageType, Task,
    TaskKey, TaskSource, TaskStatus, TaskSummary, UserRules, CHOSEN_STORAGE,
};

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{capability} does not support {operation}")]
    Unsupported {
        capability: String,
        operation: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation canceled")]
    Canceled,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("{0}")]
    Other(String),
}

impl InterfaceError {
    /// Whether the failure was caused by an asserted cancellation signal
    pub fn is_canceled(&self) -> bool {
        matches!(self, InterfaceError::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, InterfaceError>;

/// A destination backend
///
/// The engine resolves exactly one `Storage` per task and hands it a fully
/// downloaded local file. How the bytes travel from there is the backend's
/// business.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Unique, user-facing name of this storage
    fn name(&self) -> &str;

    /// Backend family
    fn storage_type(&self) -> StorageType;

    /// Compose the backend-specific target path for a task-relative path
    ///
    /// Typically joins a configured base path with `relative`.
    fn join_storage_path(&self, relative: &str) -> String;

    /// Persist `local_path` at `remote_path`
    ///
    /// Implementations should observe `cancel` and return
    /// [`InterfaceError::Canceled`] when it fires mid-write.
    async fn save(
        &self,
        local_path: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Chunk-addressed access to remote objects
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch up to `limit` bytes starting at `offset`
    ///
    /// An empty buffer means the source had nothing to return for that
    /// offset; callers decide whether that is the end or a hiccup.
    async fn fetch_chunk(&self, location: &FileLocation, offset: u64, limit: u64) -> Result<Bytes>;

    /// Fetch a small inline object (reported size 0) in a single request
    ///
    /// At most `limit` bytes are returned; anything past that is dropped.
    async fn fetch_whole(&self, location: &FileLocation, limit: u64) -> Result<Bytes>;
}

/// Read-mostly lookups owned by the persistence layer
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Rule list and rule-application flag for a user
    async fn user_rules(&self, user_id: i64) -> Result<UserRules>;

    /// Text of the message a file was posted with, if it still exists
    async fn message_text(&self, chat_id: i64, message_id: i64) -> Result<Option<String>>;
}

/// Per-task notification surface
///
/// Both calls are made from inside a worker slot and must return quickly;
/// implementations that talk to a slow UI should hand off internally.
pub trait ProgressSink: Send + Sync {
    fn report_progress(&self, task: &TaskSummary, bytes_read: u64, content_length: u64);

    fn report_terminal(&self, task: &TaskSummary, status: TaskStatus, error: Option<&str>);
}

/// Article-style documents whose body is a node tree
#[async_trait]
pub trait TelegraphClient: Send + Sync {
    /// Content nodes of the page at `path`
    async fn page(&self, path: &str) -> Result<Vec<Node>>;

    /// Fetch an absolute image URL
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_classification() {
        assert!(InterfaceError::Canceled.is_canceled());
        assert!(!InterfaceError::Network("reset".into()).is_canceled());
    }

    #[test]
    fn test_error_display() {
        let err = InterfaceError::Unsupported {
            capability: "webdav".into(),
            operation: "save".into(),
        };
        assert_eq!(err.to_string(), "webdav does not support save");

        let err = InterfaceError::InvalidTransition {
            from: TaskStatus::Failed,
            to: TaskStatus::Pending,
        };
        assert_eq!(err.to_string(), "Invalid status transition: failed -> pending");
    }
}

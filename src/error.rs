/*!
 * Error types for Courier
 */

use courier_core_interface::InterfaceError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CourierError>;

#[derive(Error, Debug)]
pub enum CourierError {
    /// No storage with this name is reachable for the user
    #[error("Storage not found: {name}")]
    StorageNotFound { name: String },

    /// Storage exists but the user may not use it
    #[error("User {user_id} may not use storage {name}")]
    StorageDenied { user_id: i64, name: String },

    /// Storage type has no built-in implementation
    #[error("Storage type {storage_type} for {name} must be registered by the embedder")]
    StorageUnavailable { name: String, storage_type: String },

    /// Rule pattern failed to compile
    #[error("Invalid rule pattern '{pattern}': {source}")]
    InvalidRule {
        pattern: String,
        source: regex::Error,
    },

    /// Remote chunk or object fetch failed
    #[error("Fetch failed: {0}")]
    Fetch(#[source] InterfaceError),

    /// Source stopped returning data before the expected length
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// Backend save failed on every attempt
    #[error("Failed to save after {attempts} attempt(s): {source}")]
    SaveFailed {
        attempts: u32,
        #[source]
        source: InterfaceError,
    },

    /// Local cache directory or file I/O failed
    #[error("Local I/O error on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Telegraph page could not be processed
    #[error("Telegraph error: {0}")]
    Telegraph(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Explicit cancellation; becomes a distinct terminal status
    #[error("Task canceled")]
    Canceled,

    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

impl CourierError {
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CourierError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should resolve a task as canceled rather than failed
    pub fn is_canceled(&self) -> bool {
        match self {
            CourierError::Canceled => true,
            CourierError::Fetch(e) | CourierError::Interface(e) => e.is_canceled(),
            CourierError::SaveFailed { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// Whether this error came from routing (skipped, never fatal on its own)
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            CourierError::StorageNotFound { .. }
                | CourierError::StorageDenied { .. }
                | CourierError::InvalidRule { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_classification() {
        assert!(CourierError::Canceled.is_canceled());
        assert!(CourierError::Fetch(InterfaceError::Canceled).is_canceled());
        assert!(CourierError::SaveFailed {
            attempts: 1,
            source: InterfaceError::Canceled,
        }
        .is_canceled());

        assert!(!CourierError::SaveFailed {
            attempts: 3,
            source: InterfaceError::Network("reset".into()),
        }
        .is_canceled());
        assert!(!CourierError::Telegraph("no images".into()).is_canceled());
    }

    #[test]
    fn test_routing_classification() {
        assert!(CourierError::StorageNotFound { name: "x".into() }.is_routing());
        assert!(!CourierError::Canceled.is_routing());
    }

    #[test]
    fn test_save_failed_keeps_last_error() {
        let err = CourierError::SaveFailed {
            attempts: 3,
            source: InterfaceError::Network("connection reset".into()),
        };
        assert_eq!(
            err.to_string(),
            "Failed to save after 3 attempt(s): Network error: connection reset"
        );
    }
}

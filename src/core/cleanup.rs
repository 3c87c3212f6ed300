//! Local cache file disposal
//!
//! Cache files are removed as soon as a transfer settles, or after a fixed
//! retention window when one is configured. Removal failures are logged and
//! never change a task's outcome.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheCleaner {
    retention: Option<Duration>,
}

impl CacheCleaner {
    /// Remove files immediately
    pub fn immediate() -> Self {
        Self { retention: None }
    }

    /// Keep files for `retention` before removing them
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            retention: Some(retention).filter(|d| !d.is_zero()),
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// Dispose of `path`
    ///
    /// Returns the handle of the delayed removal when a retention window is
    /// configured, `None` when the file was removed in place.
    pub async fn dispose(&self, path: &Path) -> Option<JoinHandle<()>> {
        match self.retention {
            None => {
                remove(path).await;
                None
            }
            Some(retention) => {
                let path = path.to_path_buf();
                debug!(path = %path.display(), ?retention, "scheduling cache removal");
                Some(tokio::spawn(remove_after(path, retention)))
            }
        }
    }
}

async fn remove_after(path: PathBuf, retention: Duration) {
    tokio::time::sleep(retention).await;
    remove(&path).await;
}

async fn remove(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed cache file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %path.display(), error = %e, "failed to remove cache file"),
    }
}

//! Local filesystem storage
//!
//! Saves are plain async file copies below a configured base directory.

use crate::config::StorageConfig;
use crate::error::CourierError;
use async_trait::async_trait;
use courier_core_interface::{InterfaceError, Result, Storage, StorageType};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Local filesystem storage
///
/// # Example
///
/// ```no_run
/// use courier::storage::LocalStorage;
/// use courier_core_interface::Storage;
///
/// let storage = LocalStorage::new("disk", "/srv/files");
/// assert_eq!(storage.join_storage_path("a/b.txt"), "/srv/files/a/b.txt");
/// ```
#[derive(Debug, Clone)]
pub struct LocalStorage {
    name: String,
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> crate::error::Result<Self> {
        let base_path = config.base_path.clone().ok_or_else(|| {
            CourierError::Config(format!("local storage {} needs a base_path", config.name))
        })?;
        Ok(Self::new(config.name.clone(), base_path))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

async fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut src = fs::File::open(from).await?;
    let mut dst = fs::File::create(to).await?;
    tokio::io::copy(&mut src, &mut dst).await?;
    dst.flush().await?;
    Ok(())
}

async fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "could not remove partial file");
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Local
    }

    fn join_storage_path(&self, relative: &str) -> String {
        self.base_path
            .join(relative.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned()
    }

    async fn save(
        &self,
        local_path: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = PathBuf::from(remote_path);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InterfaceError::Canceled),
            copied = copy_file(local_path, &target) => copied.map_err(InterfaceError::from),
        };

        if result.is_err() {
            discard_partial(&target).await;
        } else {
            debug!(storage = %self.name, path = %target.display(), "saved file");
        }
        result
    }
}

//! Local implementations of the engine's read-side capabilities
//!
//! [`LocalSource`] serves "remote" objects straight from the filesystem, and
//! [`ConfigPersistence`] answers rule lookups from the loaded configuration.
//! Together they let the binary run the full pipeline without a chat client.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use courier_core_interface::{FileLocation, InterfaceError, Persistence, RemoteSource, Result, UserRules};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::CourierConfig;

/// Remote source whose locations are filesystem paths
///
/// Relative locations are resolved against the configured root.
///
/// # Example
///
/// ```rust,no_run
/// use courier::system::LocalSource;
/// use courier_core_interface::{FileLocation, RemoteSource};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let source = LocalSource::with_root("/srv/inbox");
///     let head = source.fetch_chunk(&FileLocation::new("video.mp4"), 0, 4096).await?;
///     println!("read {} bytes", head.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalSource {
    root: Option<PathBuf>,
}

impl LocalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Filesystem path a location refers to
    pub fn resolve_path(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn open(&self, location: &FileLocation) -> Result<fs::File> {
        let path = self.resolve_path(location.as_str());
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(InterfaceError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(InterfaceError::Io(e)),
        }
    }
}

#[async_trait]
impl RemoteSource for LocalSource {
    async fn fetch_chunk(&self, location: &FileLocation, offset: u64, limit: u64) -> Result<Bytes> {
        let mut file = self.open(location).await?;
        let len = file.metadata().await?.len();
        if offset >= len {
            return Ok(Bytes::new());
        }

        file.seek(SeekFrom::Start(offset)).await?;
        read_at_most(file, limit.min(len - offset)).await
    }

    async fn fetch_whole(&self, location: &FileLocation, limit: u64) -> Result<Bytes> {
        let file = self.open(location).await?;
        let len = file.metadata().await?.len();
        read_at_most(file, limit.min(len)).await
    }
}

async fn read_at_most(file: fs::File, want: u64) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(want as usize);
    let mut reader = file.take(want);
    while reader.read_buf(&mut buf).await? > 0 {}
    Ok(buf.freeze())
}

/// Rule lookups backed by the `[[users]]` configuration
///
/// Message text has no durable home outside a chat client, so producers
/// record it alongside the submission with [`ConfigPersistence::record_message`].
#[derive(Debug, Default)]
pub struct ConfigPersistence {
    users: HashMap<i64, UserRules>,
    messages: RwLock<HashMap<(i64, i64), String>>,
}

impl ConfigPersistence {
    pub fn from_config(config: &CourierConfig) -> Self {
        Self {
            users: config
                .users
                .iter()
                .map(|user| (user.id, user.user_rules()))
                .collect(),
            messages: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_message(&self, chat_id: i64, message_id: i64, text: impl Into<String>) {
        self.messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((chat_id, message_id), text.into());
    }
}

#[async_trait]
impl Persistence for ConfigPersistence {
    async fn user_rules(&self, user_id: i64) -> Result<UserRules> {
        self.users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| InterfaceError::NotFound(format!("user {}", user_id)))
    }

    async fn message_text(&self, chat_id: i64, message_id: i64) -> Result<Option<String>> {
        Ok(self
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(chat_id, message_id))
            .cloned())
    }
}

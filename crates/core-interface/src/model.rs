//! Transfer data model
//!
//! A [`Task`] is created by a producer in [`TaskStatus::Pending`], mutated only
//! by the engine while in flight, and dropped after its terminal notification.

use crate::{InterfaceError, ProgressSink, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Rule storage name meaning "keep the storage the task already chose"
pub const CHOSEN_STORAGE: &str = "CHOSEN";

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Last non-empty path segment of a page URL, still percent-encoded
///
/// Query and fragment are ignored. `None` when `url` is not absolute or has
/// no path.
pub fn page_slug(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let slug = parsed.path_segments()?.filter(|segment| !segment.is_empty()).last()?;
    Some(slug.to_string())
}

/// Opaque reference to a remote object, meaningful only to a [`crate::RemoteSource`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation(String);

impl FileLocation {
    pub fn new(reference: impl Into<String>) -> Self {
        FileLocation(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote object handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub location: FileLocation,

    /// Size in bytes; 0 marks a small inline object fetched in one request
    pub size: u64,

    pub name: String,
}

impl RemoteFile {
    pub fn new(location: FileLocation, size: u64, name: impl Into<String>) -> Self {
        Self {
            location,
            size,
            name: name.into(),
        }
    }

    /// Whether this object bypasses chunked reading
    pub fn is_inline(&self) -> bool {
        self.size == 0
    }

    /// Deterministic digest over location, size and name
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.location.as_str().as_bytes());
        hasher.update(self.size.to_string().as_bytes());
        hasher.update(self.name.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Task state machine
///
/// `Pending` is the only non-terminal state. Status never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        self == TaskStatus::Pending && next.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Stable task identity used for cancellation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn from_message(chat_id: i64, message_id: i64) -> Self {
        TaskKey(format!("{}:{}", chat_id, message_id))
    }

    pub fn from_url(url: &str) -> Self {
        TaskKey(hex::encode(Sha256::digest(url.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a task's bytes come from
#[derive(Debug, Clone)]
pub enum TaskSource {
    /// A file attached to a chat message
    Message {
        file: RemoteFile,
        chat_id: i64,
        message_id: i64,
    },
    /// An article page whose embedded images are saved individually
    Telegraph { url: String },
}

/// Snapshot of a task's identity handed to a [`ProgressSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: u64,
    pub key: TaskKey,
    pub file_name: String,
    pub storage_name: String,
    pub storage_path: String,
}

/// One in-flight transfer request
pub struct Task {
    id: u64,
    pub source: TaskSource,
    status: TaskStatus,
    pub storage_name: String,
    /// Relative path on submit; backend-resolved path once routed
    pub storage_path: String,
    pub user_id: i64,
    pub start_time: Option<DateTime<Utc>>,
    error: Option<String>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl Task {
    pub fn new(
        source: TaskSource,
        storage_name: impl Into<String>,
        user_id: i64,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            source,
            status: TaskStatus::Pending,
            storage_name: storage_name.into(),
            storage_path: String::new(),
            user_id,
            start_time: None,
            error: None,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the task-relative destination path (defaults to the file name)
    pub fn with_storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Process-unique id assigned at construction
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> TaskKey {
        match &self.source {
            TaskSource::Message {
                chat_id,
                message_id,
                ..
            } => TaskKey::from_message(*chat_id, *message_id),
            TaskSource::Telegraph { url } => TaskKey::from_url(url),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Move to a terminal status
    pub fn advance(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(InterfaceError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record a terminal error and move to [`TaskStatus::Failed`]
    pub fn fail(&mut self, error: impl fmt::Display) -> Result<()> {
        self.advance(TaskStatus::Failed)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    pub fn file(&self) -> Option<&RemoteFile> {
        match &self.source {
            TaskSource::Message { file, .. } => Some(file),
            TaskSource::Telegraph { .. } => None,
        }
    }

    /// Display name: the remote file name, or the decoded page slug
    pub fn file_name(&self) -> String {
        match &self.source {
            TaskSource::Message { file, .. } => file.name.clone(),
            TaskSource::Telegraph { url } => {
                let Some(slug) = page_slug(url) else {
                    return String::new();
                };
                urlencoding::decode(&slug)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or(slug)
            }
        }
    }

    /// Rename the remote file; no-op for telegraph tasks
    pub fn set_file_name(&mut self, name: impl Into<String>) {
        if let TaskSource::Message { file, .. } = &mut self.source {
            file.name = name.into();
        }
    }

    pub fn sink(&self) -> &Arc<dyn ProgressSink> {
        &self.sink
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            key: self.key(),
            file_name: self.file_name(),
            storage_name: self.storage_name.clone(),
            storage_path: self.storage_path.clone(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("key", &self.key())
            .field("status", &self.status)
            .field("storage_name", &self.storage_name)
            .field("storage_path", &self.storage_path)
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            TaskSource::Message {
                file,
                chat_id,
                message_id,
            } => write!(f, "[{}:{}]:{}", chat_id, message_id, file.name),
            TaskSource::Telegraph { url } => write!(f, "[telegraph]:{}", url),
        }
    }
}

/// What a [`Rule`] pattern is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    FileNameRegex,
    MessageRegex,
}

/// User-defined routing override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type")]
    pub kind: RuleType,

    pub pattern: String,

    /// Target storage; empty or [`CHOSEN_STORAGE`] keeps the task's storage
    #[serde(default)]
    pub storage: String,

    /// Directory prefixed to the task-relative path
    #[serde(default)]
    pub dir: String,
}

impl Rule {
    pub fn new(
        kind: RuleType,
        pattern: impl Into<String>,
        storage: impl Into<String>,
        dir: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            storage: storage.into(),
            dir: dir.into(),
        }
    }

    /// Storage name this rule routes to, given the task's own choice
    pub fn target_storage<'a>(&'a self, chosen: &'a str) -> &'a str {
        if self.storage.is_empty() || self.storage == CHOSEN_STORAGE {
            chosen
        } else {
            &self.storage
        }
    }
}

/// A user's rule list, evaluated in order with the last match winning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRules {
    #[serde(default)]
    pub apply_rule: bool,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Closed set of backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    Webdav,
    /// Remote HTTP file manager
    Alist,
    /// S3-compatible object storage
    Minio,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageType::Local => "local",
            StorageType::Webdav => "webdav",
            StorageType::Alist => "alist",
            StorageType::Minio => "minio",
        };
        f.write_str(s)
    }
}

/// Article content node: bare text or an element with children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Text(String),
    Element(NodeElement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeElement {
    pub tag: String,

    #[serde(default)]
    pub attrs: HashMap<String, String>,

    #[serde(default)]
    pub children: Vec<Node>,
}

//! In-memory capability doubles for testing
//!
//! These implement the capability traits without any network or backend so
//! unit and integration tests can drive the engine end to end. Each double
//! records what it was asked to do and can be scripted to fail.
//!
//! # Example
//!
//! ```rust
//! use courier::system::mock::MemorySource;
//! use courier_core_interface::{FileLocation, RemoteSource};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let source = MemorySource::new();
//! source.insert("doc:1", b"Hello, World!".to_vec());
//!
//! let chunk = source.fetch_chunk(&FileLocation::new("doc:1"), 7, 5).await.unwrap();
//! assert_eq!(&chunk[..], b"World");
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use courier_core_interface::{
    FileLocation, InterfaceError, Node, Persistence, ProgressSink, RemoteSource, Result, Storage,
    StorageType, TaskStatus, TaskSummary, TelegraphClient, UserRules,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::rules::join_posix;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Take one unit from a countdown, returning whether one was available
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn pause(delay: Option<Duration>, cancel: Option<&CancellationToken>) -> Result<()> {
    let Some(delay) = delay else {
        return Ok(());
    };
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(InterfaceError::Canceled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Remote object source backed by a map of byte buffers
#[derive(Debug, Default)]
pub struct MemorySource {
    objects: Mutex<HashMap<String, Bytes>>,
    fetches: Mutex<Vec<(u64, u64)>>,
    whole_fetches: Mutex<Vec<u64>>,
    empty_once: Mutex<HashSet<u64>>,
    failures: AtomicU32,
    delay: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert(&self, location: &str, data: impl Into<Bytes>) {
        lock(&self.objects).insert(location.to_string(), data.into());
    }

    /// Return an empty chunk the next time `offset` is fetched
    pub fn empty_once_at(&self, offset: u64) {
        lock(&self.empty_once).insert(offset);
    }

    /// Fail the next `count` fetches with a network error
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// `(offset, limit)` of every chunk fetch so far
    pub fn fetch_log(&self) -> Vec<(u64, u64)> {
        lock(&self.fetches).clone()
    }

    /// `limit` of every single-shot fetch so far
    pub fn whole_fetch_log(&self) -> Vec<u64> {
        lock(&self.whole_fetches).clone()
    }

    fn object(&self, location: &FileLocation) -> Result<Bytes> {
        lock(&self.objects)
            .get(location.as_str())
            .cloned()
            .ok_or_else(|| InterfaceError::NotFound(location.to_string()))
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn fetch_chunk(&self, location: &FileLocation, offset: u64, limit: u64) -> Result<Bytes> {
        pause(self.delay, None).await?;
        lock(&self.fetches).push((offset, limit));

        if take_one(&self.failures) {
            return Err(InterfaceError::Network(format!(
                "chunk fetch at {} failed",
                offset
            )));
        }
        if lock(&self.empty_once).remove(&offset) {
            return Ok(Bytes::new());
        }

        let data = self.object(location)?;
        let len = data.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(limit).min(len) as usize;
        Ok(data.slice(start..end))
    }

    async fn fetch_whole(&self, location: &FileLocation, limit: u64) -> Result<Bytes> {
        pause(self.delay, None).await?;
        lock(&self.whole_fetches).push(limit);
        if take_one(&self.failures) {
            return Err(InterfaceError::Network("fetch failed".to_string()));
        }
        let data = self.object(location)?;
        Ok(data.slice(..(limit.min(data.len() as u64) as usize)))
    }
}

/// Storage that keeps saved files in memory
#[derive(Debug)]
pub struct MemoryStorage {
    name: String,
    storage_type: StorageType,
    base_path: String,
    saved: Mutex<HashMap<String, Vec<u8>>>,
    local_paths: Mutex<Vec<PathBuf>>,
    attempts: AtomicU32,
    failures: AtomicU32,
    delay: Option<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage_type: StorageType::Local,
            base_path: String::new(),
            saved: Mutex::new(HashMap::new()),
            local_paths: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            delay: None,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    /// Fail the first `count` save attempts
    pub fn failing_first(self, count: u32) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Hold every save for `delay` (interruptible by cancellation)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of save calls so far, failed ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn saved(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.saved).get(path).cloned()
    }

    /// Saved paths, sorted
    pub fn saved_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = lock(&self.saved).keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Local cache paths handed to `save`, in call order
    pub fn local_paths(&self) -> Vec<PathBuf> {
        lock(&self.local_paths).clone()
    }

    /// Highest number of overlapping saves observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn save_inner(
        &self,
        attempt: u32,
        local_path: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        pause(self.delay, Some(cancel)).await?;
        if take_one(&self.failures) {
            return Err(InterfaceError::Network(format!(
                "save attempt {} failed",
                attempt
            )));
        }

        let data = tokio::fs::read(local_path).await?;
        lock(&self.saved).insert(remote_path.to_string(), data);
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    fn join_storage_path(&self, relative: &str) -> String {
        join_posix(&self.base_path, relative)
    }

    async fn save(
        &self,
        local_path: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.local_paths).push(local_path.to_path_buf());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.save_inner(attempt, local_path, remote_path, cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// One terminal notification captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalReport {
    pub task: TaskSummary,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Sink that records every notification
#[derive(Debug, Default)]
pub struct RecordingSink {
    progress: Mutex<Vec<(u64, u64, u64)>>,
    terminals: Mutex<Vec<TerminalReport>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cumulative byte counts reported for task `id`
    pub fn progress_for(&self, id: u64) -> Vec<u64> {
        lock(&self.progress)
            .iter()
            .filter(|(task_id, _, _)| *task_id == id)
            .map(|(_, read, _)| *read)
            .collect()
    }

    pub fn terminals(&self) -> Vec<TerminalReport> {
        lock(&self.terminals).clone()
    }

    pub fn terminal_for(&self, id: u64) -> Vec<TerminalReport> {
        lock(&self.terminals)
            .iter()
            .filter(|report| report.task.id == id)
            .cloned()
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn report_progress(&self, task: &TaskSummary, bytes_read: u64, content_length: u64) {
        lock(&self.progress).push((task.id, bytes_read, content_length));
    }

    fn report_terminal(&self, task: &TaskSummary, status: TaskStatus, error: Option<&str>) {
        lock(&self.terminals).push(TerminalReport {
            task: task.clone(),
            status,
            error: error.map(str::to_string),
        });
    }
}

/// Rule and message store
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    rules: HashMap<i64, UserRules>,
    messages: HashMap<(i64, i64), String>,
    message_lookups: AtomicU32,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(mut self, user_id: i64, rules: UserRules) -> Self {
        self.rules.insert(user_id, rules);
        self
    }

    pub fn with_message(mut self, chat_id: i64, message_id: i64, text: impl Into<String>) -> Self {
        self.messages.insert((chat_id, message_id), text.into());
        self
    }

    pub fn message_lookups(&self) -> u32 {
        self.message_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn user_rules(&self, user_id: i64) -> Result<UserRules> {
        self.rules
            .get(&user_id)
            .cloned()
            .ok_or_else(|| InterfaceError::NotFound(format!("user {}", user_id)))
    }

    async fn message_text(&self, chat_id: i64, message_id: i64) -> Result<Option<String>> {
        self.message_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.messages.get(&(chat_id, message_id)).cloned())
    }
}

/// Article pages and images served from memory
#[derive(Debug, Default)]
pub struct MemoryTelegraph {
    pages: Mutex<HashMap<String, Vec<Node>>>,
    images: Mutex<HashMap<String, Bytes>>,
    fetched: Mutex<Vec<String>>,
    failures: AtomicU32,
}

impl MemoryTelegraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(&self, path: &str, nodes: Vec<Node>) {
        lock(&self.pages).insert(path.to_string(), nodes);
    }

    pub fn insert_image(&self, url: &str, data: impl Into<Bytes>) {
        lock(&self.images).insert(url.to_string(), data.into());
    }

    /// Fail the next `count` image fetches
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Image URLs requested so far, in call order
    pub fn fetched(&self) -> Vec<String> {
        lock(&self.fetched).clone()
    }
}

#[async_trait]
impl TelegraphClient for MemoryTelegraph {
    async fn page(&self, path: &str) -> Result<Vec<Node>> {
        lock(&self.pages)
            .get(path)
            .cloned()
            .ok_or_else(|| InterfaceError::NotFound(format!("page {}", path)))
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        lock(&self.fetched).push(url.to_string());
        if take_one(&self.failures) {
            return Err(InterfaceError::Network(format!("GET {} failed", url)));
        }
        lock(&self.images)
            .get(url)
            .cloned()
            .ok_or_else(|| InterfaceError::NotFound(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_slices_and_records() {
        let source = MemorySource::new();
        source.insert("doc", b"0123456789".to_vec());
        let location = FileLocation::new("doc");

        assert_eq!(&source.fetch_chunk(&location, 4, 4).await.unwrap()[..], b"4567");
        assert_eq!(&source.fetch_chunk(&location, 8, 4).await.unwrap()[..], b"89");
        assert!(source.fetch_chunk(&location, 12, 4).await.unwrap().is_empty());
        assert_eq!(source.fetch_log(), vec![(4, 4), (8, 4), (12, 4)]);
    }

    #[tokio::test]
    async fn test_source_empty_once() {
        let source = MemorySource::new();
        source.insert("doc", b"abc".to_vec());
        source.empty_once_at(0);
        let location = FileLocation::new("doc");

        assert!(source.fetch_chunk(&location, 0, 3).await.unwrap().is_empty());
        assert_eq!(&source.fetch_chunk(&location, 0, 3).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_storage_scripted_failures() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("f");
        std::fs::write(&local, b"x").unwrap();

        let storage = MemoryStorage::new("mem").failing_first(1);
        let token = CancellationToken::new();

        assert!(storage.save(&local, "a", &token).await.is_err());
        assert!(storage.save(&local, "a", &token).await.is_ok());
        assert_eq!(storage.attempts(), 2);
        assert_eq!(storage.saved("a").unwrap(), b"x");
        assert_eq!(storage.peak_concurrency(), 1);
    }

    #[test]
    fn test_sink_filters_by_task() {
        let sink = RecordingSink::new();
        let summary = TaskSummary {
            id: 3,
            key: courier_core_interface::TaskKey::from_message(1, 1),
            file_name: "f".into(),
            storage_name: "s".into(),
            storage_path: "p".into(),
        };

        sink.report_progress(&summary, 10, 20);
        sink.report_progress(&summary, 20, 20);
        sink.report_terminal(&summary, TaskStatus::Succeeded, None);

        assert_eq!(sink.progress_for(3), vec![10, 20]);
        assert!(sink.progress_for(4).is_empty());
        assert_eq!(sink.terminal_for(3).len(), 1);
    }
}

/*!
 * Transfer pipeline for a single pending task
 *
 * Routing, download into the local cache, persist with retry, and cache
 * disposal. The pipeline never changes a task's status; the scheduler maps
 * the returned result onto the task.
 */

use crate::core::cleanup::CacheCleaner;
use crate::core::progress::progress_interval;
use crate::core::reader::{ChunkedRangeReader, CHUNK_SIZE};
use crate::core::retry::{fetch_with_retry, save_with_retry};
use crate::core::router::{Route, StorageRouter};
use crate::core::telegraph::{ImageTarget, TelegraphDownloader};
use crate::error::{CourierError, Result};
use chrono::Utc;
use courier_core_interface::{RemoteFile, RemoteSource, Task, TaskSource};
use courier_core_resilience::RetryPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};

/// Bytes read from the head of a cache file to detect its type
const SNIFF_LEN: usize = 8192;

pub struct TransferPipeline {
    router: StorageRouter,
    source: Arc<dyn RemoteSource>,
    telegraph: Option<TelegraphDownloader>,
    policy: RetryPolicy,
    cleaner: CacheCleaner,
    cache_dir: PathBuf,
}

/// Name given to a message file that arrived without one
pub fn fallback_file_name(chat_id: i64, message_id: i64, file: &RemoteFile) -> String {
    format!("{}_{}_{}", chat_id, message_id, file.hash())
}

/// Cache file name for a task; the id keeps duplicate submissions apart
pub fn cache_file_name(task_id: u64, file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}_{}", task_id, safe)
}

/// Extension to append when `file_name` has none and the content is recognised
async fn missing_extension(file_name: &str, cache_path: &Path) -> Option<&'static str> {
    if Path::new(file_name).extension().is_some() {
        return None;
    }

    let mut head = Vec::with_capacity(SNIFF_LEN);
    let read = async {
        let file = tokio::fs::File::open(cache_path).await?;
        file.take(SNIFF_LEN as u64).read_to_end(&mut head).await
    };
    if let Err(e) = read.await {
        error!(path = %cache_path.display(), error = %e, "failed to read cache file for type detection");
        return None;
    }
    infer::get(&head).map(|kind| kind.extension())
}

impl TransferPipeline {
    pub fn new(
        router: StorageRouter,
        source: Arc<dyn RemoteSource>,
        cache_dir: impl Into<PathBuf>,
        policy: RetryPolicy,
        cleaner: CacheCleaner,
    ) -> Self {
        Self {
            router,
            source,
            telegraph: None,
            policy,
            cleaner,
            cache_dir: cache_dir.into(),
        }
    }

    /// Enable telegraph tasks
    pub fn with_telegraph(mut self, downloader: TelegraphDownloader) -> Self {
        self.telegraph = Some(downloader);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Process `task`, leaving its route recorded on it
    pub async fn run(&self, task: &mut Task) -> Result<()> {
        debug!(task = %task, "processing task");
        if task.cancel_token().is_cancelled() {
            return Err(CourierError::Canceled);
        }

        if let TaskSource::Message {
            file,
            chat_id,
            message_id,
        } = &task.source
        {
            if file.name.is_empty() {
                let name = fallback_file_name(*chat_id, *message_id, file);
                task.set_file_name(name);
            }
        }
        if task.storage_path.is_empty() {
            task.storage_path = task.file_name();
        }

        let mut route = self.router.resolve(task).await?;
        task.storage_name = route.storage.name().to_string();
        task.storage_path = route.path.clone();
        task.start_time = Some(Utc::now());

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CourierError::local_io(&self.cache_dir, e))?;

        let file = match &task.source {
            TaskSource::Telegraph { url } => {
                let task = &*task;
                return self.run_telegraph(task, &route, url).await;
            }
            TaskSource::Message { file, .. } => file.clone(),
        };

        let cache_path = self.cache_dir.join(cache_file_name(task.id(), &file.name));
        let result = self.transfer(task, &file, &mut route, &cache_path).await;
        self.cleaner.dispose(&cache_path).await;
        result
    }

    async fn transfer(
        &self,
        task: &mut Task,
        file: &RemoteFile,
        route: &mut Route,
        cache_path: &Path,
    ) -> Result<()> {
        let bytes = if file.is_inline() {
            self.download_inline(task, file, cache_path).await?
        } else {
            self.download(task, file, cache_path).await?
        };
        info!(task = %task, bytes, path = %cache_path.display(), "downloaded file");

        if let Some(ext) = missing_extension(&task.file_name(), cache_path).await {
            debug!(task = %task, ext, "appending detected extension");
            let name = format!("{}.{}", task.file_name(), ext);
            task.set_file_name(name);
            route.path = format!("{}.{}", route.path, ext);
            task.storage_path = route.path.clone();
        }

        self.persist(task, route, cache_path).await
    }

    async fn download(&self, task: &Task, file: &RemoteFile, cache_path: &Path) -> Result<u64> {
        let mut out = tokio::fs::File::create(cache_path)
            .await
            .map_err(|e| CourierError::local_io(cache_path, e))?;

        let sink = task.sink().clone();
        let summary = task.summary();
        let mut reader = ChunkedRangeReader::whole(self.source.clone(), file)
            .with_retry_policy(self.policy)
            .with_cancel(task.cancel_token().clone())
            .with_progress(
                progress_interval(file.size),
                Box::new(move |read, total| sink.report_progress(&summary, read, total)),
            );

        reader.copy_to(&mut out).await
    }

    /// Single bounded fetch for objects that report no size
    async fn download_inline(&self, task: &Task, file: &RemoteFile, cache_path: &Path) -> Result<u64> {
        let source = self.source.as_ref();
        let location = &file.location;
        let bytes = fetch_with_retry(&self.policy, task.cancel_token(), || {
            source.fetch_whole(location, CHUNK_SIZE)
        })
        .await?;

        tokio::fs::write(cache_path, &bytes)
            .await
            .map_err(|e| CourierError::local_io(cache_path, e))?;

        let len = bytes.len() as u64;
        task.sink().report_progress(&task.summary(), len, len);
        Ok(len)
    }

    async fn run_telegraph(&self, task: &Task, route: &Route, url: &str) -> Result<()> {
        let downloader = self.telegraph.as_ref().ok_or_else(|| {
            CourierError::Telegraph("telegraph client is not configured".to_string())
        })?;

        let target = ImageTarget {
            storage: route.storage.as_ref(),
            storage_path: &route.path,
            cache_dir: &self.cache_dir,
            task_id: task.id(),
        };
        downloader.run(url, &target, task.cancel_token()).await?;
        Ok(())
    }

    async fn persist(&self, task: &Task, route: &Route, cache_path: &Path) -> Result<()> {
        save_with_retry(
            route.storage.as_ref(),
            cache_path,
            &route.path,
            &self.policy,
            task.cancel_token(),
        )
        .await?;

        info!(
            task = %task,
            storage = %route.storage.name(),
            path = %route.path,
            "saved file"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageRegistry;
    use crate::system::mock::{MemoryPersistence, MemorySource, MemoryStorage, RecordingSink};
    use courier_core_interface::{FileLocation, TaskStatus};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache: PathBuf,
        source: Arc<MemorySource>,
        storage: Arc<MemoryStorage>,
        sink: Arc<RecordingSink>,
        pipeline: TransferPipeline,
    }

    fn fixture(storage: MemoryStorage) -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        let source = Arc::new(MemorySource::new());
        let storage = Arc::new(storage);

        let registry = StorageRegistry::new();
        registry.register(storage.clone());
        let router = StorageRouter::new(Arc::new(registry), Arc::new(MemoryPersistence::new()));
        let pipeline = TransferPipeline::new(
            router,
            source.clone(),
            &cache,
            RetryPolicy::new(2),
            CacheCleaner::immediate(),
        );

        Fixture {
            _dir: dir,
            cache,
            source,
            storage,
            sink: Arc::new(RecordingSink::new()),
            pipeline,
        }
    }

    fn message_task(fx: &Fixture, name: &str, size: u64) -> Task {
        Task::new(
            TaskSource::Message {
                file: RemoteFile::new(FileLocation::new("doc"), size, name),
                chat_id: 11,
                message_id: 22,
            },
            "mem",
            1,
            fx.sink.clone(),
        )
    }

    #[tokio::test]
    async fn test_chunked_transfer() {
        let fx = fixture(MemoryStorage::new("mem").with_base_path("/store"));
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        fx.source.insert("doc", data.clone());

        let mut task = message_task(&fx, "a.bin", data.len() as u64);
        fx.pipeline.run(&mut task).await.unwrap();

        assert_eq!(task.storage_path, "/store/a.bin");
        assert!(task.start_time.is_some());
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(fx.storage.saved("/store/a.bin").unwrap(), data);
        assert_eq!(fx.sink.progress_for(task.id()).last(), Some(&5000));
        assert_eq!(std::fs::read_dir(&fx.cache).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_inline_transfer() {
        let fx = fixture(MemoryStorage::new("mem"));
        fx.source.insert("doc", b"thumbnail".to_vec());

        let mut task = message_task(&fx, "thumb.jpg", 0);
        fx.pipeline.run(&mut task).await.unwrap();

        assert_eq!(fx.storage.saved("thumb.jpg").unwrap(), b"thumbnail");
        assert!(fx.source.fetch_log().is_empty());
        assert_eq!(fx.source.whole_fetch_log(), vec![CHUNK_SIZE]);
        assert_eq!(fx.sink.progress_for(task.id()), vec![9]);
    }

    #[tokio::test]
    async fn test_inline_fetch_is_bounded() {
        let fx = fixture(MemoryStorage::new("mem"));
        fx.source.insert("doc", vec![1u8; 5 * CHUNK_SIZE as usize]);

        let mut task = message_task(&fx, "big.jpg", 0);
        fx.pipeline.run(&mut task).await.unwrap();

        assert_eq!(fx.storage.saved("big.jpg").unwrap().len() as u64, CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_chunk_fetch_failures_are_retried() {
        let fx = fixture(MemoryStorage::new("mem"));
        fx.source.insert("doc", b"payload".to_vec());
        fx.source.fail_next(2);

        let mut task = message_task(&fx, "a.bin", 7);
        fx.pipeline.run(&mut task).await.unwrap();

        assert_eq!(fx.source.fetch_log().len(), 3);
        assert_eq!(fx.storage.saved("a.bin").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_chunk_fetch_retries_exhausted() {
        let fx = fixture(MemoryStorage::new("mem"));
        fx.source.insert("doc", b"payload".to_vec());
        fx.source.fail_next(3);

        let mut task = message_task(&fx, "a.bin", 7);
        let err = fx.pipeline.run(&mut task).await.unwrap_err();

        assert!(matches!(err, CourierError::Fetch(_)));
        assert_eq!(fx.storage.attempts(), 0);
        assert_eq!(std::fs::read_dir(&fx.cache).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_detected_extension_is_appended() {
        let fx = fixture(MemoryStorage::new("mem").with_base_path("/store"));
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        fx.source.insert("doc", png.to_vec());

        let mut task = message_task(&fx, "", png.len() as u64);
        fx.pipeline.run(&mut task).await.unwrap();

        assert!(task.file_name().ends_with(".png"), "{}", task.file_name());
        assert_eq!(task.storage_path, format!("/store/{}", task.file_name()));
        assert!(fx.storage.saved(&task.storage_path).is_some());
    }

    #[tokio::test]
    async fn test_named_or_unknown_content_keeps_name() {
        let fx = fixture(MemoryStorage::new("mem"));
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        fx.source.insert("doc", png.to_vec());

        let mut task = message_task(&fx, "image.bin", png.len() as u64);
        fx.pipeline.run(&mut task).await.unwrap();
        assert_eq!(task.storage_path, "image.bin");

        fx.source.insert("doc", b"plain words".to_vec());
        let mut task = message_task(&fx, "notes", 11);
        fx.pipeline.run(&mut task).await.unwrap();
        assert_eq!(task.storage_path, "notes");
    }

    #[tokio::test]
    async fn test_fallback_file_name() {
        let fx = fixture(MemoryStorage::new("mem"));
        fx.source.insert("doc", b"abc".to_vec());

        let mut task = message_task(&fx, "", 3);
        let expected = fallback_file_name(
            11,
            22,
            &RemoteFile::new(FileLocation::new("doc"), 3, ""),
        );
        fx.pipeline.run(&mut task).await.unwrap();

        assert_eq!(task.file_name(), expected);
        assert_eq!(task.storage_path, expected);
        assert!(fx.storage.saved(&expected).is_some());
    }

    #[tokio::test]
    async fn test_save_failure_still_cleans_cache() {
        let fx = fixture(MemoryStorage::new("mem").failing_first(10));
        fx.source.insert("doc", b"abc".to_vec());

        let mut task = message_task(&fx, "a.bin", 3);
        let err = fx.pipeline.run(&mut task).await.unwrap_err();

        assert!(matches!(err, CourierError::SaveFailed { attempts: 3, .. }));
        assert_eq!(std::fs::read_dir(&fx.cache).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_canceled_before_start() {
        let fx = fixture(MemoryStorage::new("mem"));
        let mut task = message_task(&fx, "a.bin", 3);
        task.cancel_token().cancel();

        let err = fx.pipeline.run(&mut task).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(fx.storage.attempts(), 0);
    }

    #[tokio::test]
    async fn test_telegraph_without_client() {
        let fx = fixture(MemoryStorage::new("mem"));
        let mut task = Task::new(
            TaskSource::Telegraph {
                url: "https://telegra.ph/Page-01".into(),
            },
            "mem",
            1,
            fx.sink.clone(),
        );

        let err = fx.pipeline.run(&mut task).await.unwrap_err();
        assert!(matches!(err, CourierError::Telegraph(_)));
    }

    #[test]
    fn test_cache_file_name() {
        assert_eq!(cache_file_name(7, "a/b.txt"), "7_a_b.txt");
        assert_eq!(cache_file_name(8, "plain.bin"), "8_plain.bin");
    }
}

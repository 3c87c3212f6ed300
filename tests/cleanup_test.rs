use courier::core::{CacheCleaner, Scheduler, StorageRouter, TransferPipeline};
use courier::storage::StorageRegistry;
use courier::system::mock::{MemoryPersistence, MemorySource, MemoryStorage, RecordingSink};
use courier_core_interface::{FileLocation, RemoteFile, Task, TaskSource, TaskStatus};
use courier_core_resilience::RetryPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Setup {
    _dir: TempDir,
    cache: PathBuf,
    storage: Arc<MemoryStorage>,
    sink: Arc<RecordingSink>,
    scheduler: Scheduler,
}

fn setup(storage: MemoryStorage, cleaner: CacheCleaner) -> Setup {
    let dir = TempDir::new().unwrap();
    let cache = dir.path().join("cache");
    let source = Arc::new(MemorySource::new());
    source.insert("doc", b"cached bytes".to_vec());
    let storage = Arc::new(storage);

    let registry = StorageRegistry::new();
    registry.register(storage.clone());
    let pipeline = TransferPipeline::new(
        StorageRouter::new(Arc::new(registry), Arc::new(MemoryPersistence::new())),
        source,
        &cache,
        RetryPolicy::new(1),
        cleaner,
    );

    let scheduler = Scheduler::new(pipeline, 1);
    scheduler.start();
    Setup {
        _dir: dir,
        cache,
        storage,
        sink: Arc::new(RecordingSink::new()),
        scheduler,
    }
}

fn submit(s: &Setup, name: &str) -> u64 {
    let task = Task::new(
        TaskSource::Message {
            file: RemoteFile::new(FileLocation::new("doc"), 12, name),
            chat_id: 1,
            message_id: 2,
        },
        "mem",
        1,
        s.sink.clone(),
    );
    let id = task.id();
    s.scheduler.submit(task);
    id
}

async fn settle(s: &Setup) {
    tokio::time::timeout(Duration::from_secs(10), s.scheduler.drain())
        .await
        .unwrap();
}

fn cache_entries(cache: &Path) -> usize {
    std::fs::read_dir(cache).map(|dir| dir.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_cache_removed_immediately_after_success() {
    let s = setup(MemoryStorage::new("mem"), CacheCleaner::immediate());
    submit(&s, "a.bin");
    settle(&s).await;

    assert_eq!(s.sink.terminals()[0].status, TaskStatus::Succeeded);
    assert_eq!(cache_entries(&s.cache), 0);
    s.scheduler.shutdown();
}

#[tokio::test]
async fn test_cache_removed_immediately_after_failure() {
    let s = setup(MemoryStorage::new("mem").failing_first(5), CacheCleaner::immediate());
    submit(&s, "a.bin");
    settle(&s).await;

    assert_eq!(s.sink.terminals()[0].status, TaskStatus::Failed);
    assert_eq!(s.storage.attempts(), 2);
    assert_eq!(cache_entries(&s.cache), 0);
    s.scheduler.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cache_kept_for_retention_window() {
    let s = setup(
        MemoryStorage::new("mem"),
        CacheCleaner::with_retention(Duration::from_millis(300)),
    );
    let id = submit(&s, "kept.bin");
    settle(&s).await;

    let cached = s.cache.join(format!("{}_kept.bin", id));
    assert!(cached.exists(), "cache file removed before its retention ran out");
    assert_eq!(s.storage.local_paths(), vec![cached.clone()]);

    tokio::time::timeout(Duration::from_secs(5), async {
        while cached.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("cache file was never removed");
    s.scheduler.shutdown();
}

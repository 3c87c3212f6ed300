/*!
 * Courier CLI
 *
 * Runs the transfer engine against local files: each line on stdin is a JSON
 * request, and the process exits once every submitted task has settled.
 *
 * ```text
 * {"op": "save", "path": "/srv/inbox/a.mp4", "chat_id": 1, "message_id": 2, "storage": "disk", "user_id": 7}
 * {"op": "announce", "path": "/srv/inbox/b.mp4"}
 * {"op": "save", "hash": "<hash printed by announce>", "chat_id": 1, "message_id": 3, "storage": "disk", "user_id": 7}
 * {"op": "cancel", "chat_id": 1, "message_id": 2}
 * ```
 */

use anyhow::{bail, Context, Result};
use clap::Parser;
use courier::{
    config::CourierConfig,
    logging,
    system::{ConfigPersistence, LocalSource},
    CacheCleaner, FileLookup, LogSink, Scheduler, StorageRegistry, StorageRouter,
    TransferPipeline,
};
use courier_core_interface::{FileLocation, RemoteFile, Task, TaskKey, TaskSource};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "courier")]
#[command(version, about = "Queue chat file transfers into configured storages", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of worker slots
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Extra save attempts after a failure
    #[arg(short = 'r', long)]
    retry: Option<u32>,

    /// Resolve relative request paths against this directory
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Write logs as JSON to this file
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request {
    Save(SaveRequest),
    Announce { path: String },
    Cancel { chat_id: i64, message_id: i64 },
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    /// Local path standing in for the remote object
    path: Option<String>,
    /// Hash returned by an earlier `announce`
    hash: Option<String>,
    name: Option<String>,
    size: Option<u64>,
    chat_id: i64,
    message_id: i64,
    storage: String,
    user_id: i64,
    /// Relative destination path; defaults to the file name
    #[serde(default)]
    dest: String,
    /// Text of the originating message, for message rules
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => CourierConfig::from_file(path)?,
        None => CourierConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(retry) = cli.retry {
        config.retry = retry;
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;
    config.validate()?;

    logging::init_logging(&config)?;

    let registry = Arc::new(StorageRegistry::new());
    let built = registry.load(&config)?;
    info!(storages = built, workers = config.workers, "courier starting");

    let persistence = Arc::new(ConfigPersistence::from_config(&config));
    let source = match cli.root {
        Some(ref root) => LocalSource::with_root(root),
        None => LocalSource::new(),
    };
    let cleaner = config
        .temp
        .retention()
        .map_or_else(CacheCleaner::immediate, CacheCleaner::with_retention);

    let pipeline = TransferPipeline::new(
        StorageRouter::new(registry, persistence.clone()),
        Arc::new(source.clone()),
        config.temp.base_path.clone(),
        config.retry_policy(),
        cleaner,
    );
    let scheduler = Scheduler::new(pipeline, config.workers);
    let workers = scheduler.start();

    let lookup = FileLookup::new(config.lookup_ttl());
    let sink = Arc::new(LogSink);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading requests")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "ignoring malformed request");
                continue;
            }
        };

        match request {
            Request::Announce { path } => match remote_file(&source, &path, None, None).await {
                Ok(file) => println!("{}", lookup.remember(&file)),
                Err(e) => warn!(error = %e, path = %path, "cannot announce file"),
            },
            Request::Cancel {
                chat_id,
                message_id,
            } => {
                let key = TaskKey::from_message(chat_id, message_id);
                if !scheduler.cancel(&key) {
                    warn!(key = %key, "nothing to cancel");
                }
            }
            Request::Save(request) => {
                let file = match resolve_file(&source, &lookup, &request).await {
                    Ok(file) => file,
                    Err(e) => {
                        warn!(error = %e, "ignoring save request");
                        continue;
                    }
                };
                if let Some(ref text) = request.message {
                    persistence.record_message(request.chat_id, request.message_id, text.as_str());
                }

                let task = Task::new(
                    TaskSource::Message {
                        file,
                        chat_id: request.chat_id,
                        message_id: request.message_id,
                    },
                    request.storage,
                    request.user_id,
                    sink.clone(),
                )
                .with_storage_path(request.dest);
                scheduler.submit(task);
            }
        }
    }

    info!(
        queued = scheduler.queued(),
        outstanding = scheduler.outstanding(),
        "input closed, draining"
    );
    scheduler.drain().await;
    scheduler.shutdown();
    for worker in workers {
        worker.await.context("worker panicked")?;
    }
    info!(remembered = lookup.len(), "courier finished");

    Ok(())
}

async fn resolve_file(
    source: &LocalSource,
    lookup: &FileLookup,
    request: &SaveRequest,
) -> Result<RemoteFile> {
    match (&request.hash, &request.path) {
        (Some(hash), _) => lookup
            .take(hash)
            .with_context(|| format!("unknown or expired file hash {}", hash)),
        (None, Some(path)) => {
            remote_file(source, path, request.name.as_deref(), request.size).await
        }
        (None, None) => bail!("save request needs a path or a hash"),
    }
}

async fn remote_file(
    source: &LocalSource,
    path: &str,
    name: Option<&str>,
    size: Option<u64>,
) -> Result<RemoteFile> {
    let size = match size {
        Some(size) => size,
        None => tokio::fs::metadata(source.resolve_path(path))
            .await
            .with_context(|| format!("cannot stat {}", path))?
            .len(),
    };
    let name = name.map(str::to_string).unwrap_or_else(|| {
        std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    Ok(RemoteFile::new(FileLocation::new(path), size, name))
}

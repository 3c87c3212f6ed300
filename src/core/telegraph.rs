//! Telegraph page downloads
//!
//! A telegraph task saves every image embedded in an article page. Images
//! are collected in document order and stored as `{storage_path}/{i}{ext}`
//! with `i` starting at 1.

use crate::core::cleanup::CacheCleaner;
use crate::core::rules::join_posix;
use crate::error::{CourierError, Result};
use courier_core_interface::{page_slug, InterfaceError, Node, Storage, TelegraphClient};
use courier_core_resilience::{with_retry, RetryError, RetryPolicy};
use futures::stream::{self, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Origin that site-relative `/file/...` image sources resolve against
pub const TELEGRAPH_ORIGIN: &str = "https://telegra.ph";

/// Image sources of `nodes`, in document order
pub fn collect_images(nodes: &[Node]) -> Vec<String> {
    let mut images = Vec::new();
    for node in nodes {
        visit(node, &mut images);
    }
    images
}

fn visit(node: &Node, images: &mut Vec<String>) {
    if let Node::Element(element) = node {
        if element.tag == "img" {
            if let Some(src) = element.attrs.get("src") {
                images.push(src.clone());
            }
        }
        for child in &element.children {
            visit(child, images);
        }
    }
}

/// Make a site-relative image source absolute
pub fn absolute_image_url(src: &str) -> String {
    if src.starts_with("/file/") {
        format!("{}{}", TELEGRAPH_ORIGIN, src)
    } else {
        src.to_string()
    }
}

/// Extension of the last path segment of `url`, including the dot
pub fn image_extension(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    segment
        .rfind('.')
        .map_or_else(String::new, |dot| segment[dot..].to_string())
}

/// Downloads and stores the images of one page
pub struct TelegraphDownloader {
    client: Arc<dyn TelegraphClient>,
    policy: RetryPolicy,
    fanout: usize,
    cleaner: CacheCleaner,
}

/// Where one page's images go
pub struct ImageTarget<'a> {
    pub storage: &'a dyn Storage,
    pub storage_path: &'a str,
    pub cache_dir: &'a Path,
    pub task_id: u64,
}

impl TelegraphDownloader {
    pub fn new(
        client: Arc<dyn TelegraphClient>,
        policy: RetryPolicy,
        fanout: usize,
        cleaner: CacheCleaner,
    ) -> Self {
        Self {
            client,
            policy,
            fanout: fanout.max(1),
            cleaner,
        }
    }

    /// Save every image of the page at `url`, returning how many were saved
    pub async fn run(
        &self,
        url: &str,
        target: &ImageTarget<'_>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let path = page_slug(url)
            .ok_or_else(|| CourierError::Telegraph(format!("invalid page url: {}", url)))?;

        let nodes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CourierError::Canceled),
            page = self.client.page(&path) => page.map_err(|e| {
                CourierError::Telegraph(format!("failed to fetch page {}: {}", path, e))
            })?,
        };

        let images = collect_images(&nodes);
        if images.is_empty() {
            return Err(CourierError::Telegraph(format!("no images found on {}", path)));
        }
        debug!(page = %path, count = images.len(), "collected telegraph images");

        let count = images.len();
        stream::iter(images.into_iter().enumerate().map(Ok::<_, CourierError>))
            .try_for_each_concurrent(self.fanout, |(index, src)| {
                self.save_image(index + 1, absolute_image_url(&src), target, cancel)
            })
            .await?;

        info!(page = %path, count, "saved telegraph page");
        Ok(count)
    }

    async fn save_image(
        &self,
        number: usize,
        url: String,
        target: &ImageTarget<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ext = image_extension(&url);
        let ext = ext.as_str();
        let remote_path = join_posix(target.storage_path, &format!("{}{}", number, ext));
        let local_path = target
            .cache_dir
            .join(format!("{}_{}{}", target.task_id, number, ext));

        let outcome = with_retry(&self.policy, cancel, |_| {
            let url = url.as_str();
            let local_path = local_path.as_path();
            let remote_path = remote_path.as_str();
            async move {
                let bytes = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(InterfaceError::Canceled),
                    fetched = self.client.fetch(url) => fetched?,
                };
                tokio::fs::write(local_path, &bytes).await?;
                target.storage.save(local_path, remote_path, cancel).await
            }
        })
        .await;

        self.cleaner.dispose(&local_path).await;

        match outcome {
            Ok(()) => {
                debug!(path = %remote_path, "saved image");
                Ok(())
            }
            Err(RetryError::Canceled { .. }) => Err(CourierError::Canceled),
            Err(RetryError::Exhausted { last, .. }) if last.is_canceled() => {
                Err(CourierError::Canceled)
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(CourierError::Telegraph(format!(
                "image {} ({}) failed after {} attempt(s): {}",
                number, url, attempts, last
            ))),
        }
    }
}

//! Request gateway: cache-first lookup, otherwise enqueue a crawl job.

use anyhow::anyhow;
use sitemapper_core::model;
use sitemapper_core::{JobQueue, QueueError, Request, Response, Sitemap, SitemapCache, Topic};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// What a call to [`Gateway::crawl`] did besides building the response.
#[derive(Debug)]
pub enum Outcome {
    /// Answered from the cache; nothing was queued.
    Cached,
    /// A job was handed to the queue. Dropping the task keeps it running.
    Enqueued(PublishTask),
    /// The request could not be served.
    Failed,
}

/// Handle on a background publish of one crawl request.
#[derive(Debug)]
pub struct PublishTask {
    handle: JoinHandle<Result<(), QueueError>>,
}

impl PublishTask {
    /// Wait for the publish and surface its error, if any.
    pub async fn join(self) -> anyhow::Result<()> {
        match self.handle.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(anyhow!("publish task failed: {}", e)),
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    cache: Arc<dyn SitemapCache>,
    queue: Arc<dyn JobQueue>,
}

impl Gateway {
    pub fn new(cache: Arc<dyn SitemapCache>, queue: Arc<dyn JobQueue>) -> Self {
        Self { cache, queue }
    }

    /// Serve a crawl request for `url`.
    ///
    /// A cache hit answers `ok` with the stored sitemap. A miss mints a
    /// correlation identifier, publishes the job in the background and answers
    /// `accepted` straight away; the result arrives through the result router.
    pub async fn crawl(&self, url: &str) -> (Response, Outcome) {
        let url = url.trim();
        let request = Request::new(url);

        if !is_crawlable(url) {
            warn!("Rejecting crawl request for {:?}", url);
            return (Response::error(request), Outcome::Failed);
        }

        match self.cache.get(url).await {
            Ok(Some(blob)) => match model::decode::<Sitemap>(blob.as_bytes()) {
                Ok(sitemap) => {
                    info!("Serving {} from cache ({} pages)", url, sitemap.len());
                    return (Response::ok(request, sitemap), Outcome::Cached);
                }
                Err(e) => warn!("Ignoring unreadable cache entry for {}: {}", url, e),
            },
            Ok(None) => debug!("Cache miss for {}", url),
            Err(e) => {
                error!("Cache lookup for {} failed: {}", url, e);
                return (Response::error(request), Outcome::Failed);
            }
        }

        let task = self.submit(request.clone());
        (Response::accepted(request), Outcome::Enqueued(task))
    }

    fn submit(&self, request: Request) -> PublishTask {
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            let result = publish_request(queue.as_ref(), &request).await;
            match &result {
                Ok(()) => info!("Queued {} as request {}", request.url, request.req_id),
                Err(e) => warn!("Could not queue request {}: {}", request.req_id, e),
            }
            result
        });
        PublishTask { handle }
    }
}

async fn publish_request(queue: &dyn JobQueue, request: &Request) -> Result<(), QueueError> {
    let payload = model::encode(request)?;
    queue.setup_topology().await?;
    queue.publish(Topic::Requests, payload).await
}

/// Absolute http(s) URL with a host.
fn is_crawlable(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

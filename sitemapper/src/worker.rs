//! Crawl worker: turns queued requests into sitemaps on the response topic.

use futures::StreamExt;
use sitemapper_core::model;
use sitemapper_core::{JobQueue, QueueError, Request, Response, Topic};
use sitemapper_scanner::Crawler;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DEFAULT_JOBS: usize = 4;

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    crawler: Crawler,
    jobs: usize,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, crawler: Crawler) -> Self {
        Self {
            queue,
            crawler,
            jobs: DEFAULT_JOBS,
        }
    }

    /// Number of crawl jobs run at once.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Consume the request topic until it ends.
    ///
    /// Every delivery is acknowledged once handled, including malformed ones.
    pub async fn run(&self) -> Result<(), QueueError> {
        if let Err(e) = self.queue.setup_topology().await {
            error!("Could not set up queue topology: {}", e);
            return Err(e);
        }
        let deliveries = self.queue.consume(Topic::Requests).await?;
        info!(
            "Worker consuming {} ({} concurrent jobs)",
            Topic::Requests,
            self.jobs
        );

        deliveries
            .for_each_concurrent(self.jobs, |delivery| async move {
                if let Some(response) = self.handle(&delivery.payload).await {
                    if let Err(e) = self.publish(&response).await {
                        warn!("Could not publish result for {}: {}", response.req_id(), e);
                    }
                }
                if let Err(e) = delivery.ack().await {
                    warn!("Could not ack request: {}", e);
                }
            })
            .await;

        info!("Request topic closed, worker stopping");
        Ok(())
    }

    /// Crawl the request in `payload`. `None` means the payload was not a
    /// usable request and nothing should be published.
    pub async fn handle(&self, payload: &[u8]) -> Option<Response> {
        let request = match model::decode::<Request>(payload) {
            Ok(request) if !request.req_id.is_empty() => request,
            Ok(_) => {
                warn!("Dropping request without reqId");
                return None;
            }
            Err(e) => {
                warn!("Dropping malformed request: {}", e);
                return None;
            }
        };

        info!("Crawling {} for request {}", request.url, request.req_id);
        match self.crawler.crawl_with_stats(&request.url).await {
            Ok((sitemap, stats)) => {
                info!(
                    "Request {} done: {} pages ({} failed) in {:?}",
                    request.req_id,
                    sitemap.len(),
                    stats.pages_failed,
                    stats.elapsed
                );
                Some(Response::ok(request, sitemap))
            }
            Err(e) => {
                warn!("Request {} failed: {}", request.req_id, e);
                Some(Response::error(request))
            }
        }
    }

    async fn publish(&self, response: &Response) -> Result<(), QueueError> {
        let payload = model::encode(response)?;
        self.queue.publish(Topic::Responses, payload).await
    }
}

use crate::decode::{ACCEPT_ENCODING, content_encodings, decode_body};
use crate::error::{Result, ScanError};
use crate::links::{extract_links, subdomain_of};
use crate::result::{CrawlStats, Sitemap};
use crate::robots::{Politeness, PolitenessGate, fetch_crawl_delay};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Client;
use reqwest::header::{ACCEPT_ENCODING as ACCEPT_ENCODING_HEADER, HeaderMap, HeaderValue};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Same-subdomain crawl engine.
///
/// A `Crawler` is cheap to clone and can run many jobs concurrently; every
/// call to [`Crawler::crawl`] gets its own visited set and sitemap.
#[derive(Clone)]
pub struct Crawler {
    client: Client,
    max_concurrency: usize,
    politeness: Politeness,
}

impl Crawler {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_ENCODING_HEADER,
            HeaderValue::from_static(ACCEPT_ENCODING),
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .no_gzip() // bodies are decoded by `decode_body`
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            politeness: Politeness::default(),
        }
    }

    /// Upper bound on pages fetched at the same time within one job.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_politeness(mut self, politeness: Politeness) -> Self {
        self.politeness = politeness;
        self
    }

    /// Crawl every page reachable from `start_url` within its subdomain.
    pub async fn crawl(&self, start_url: &str) -> Result<Sitemap> {
        let (sitemap, _) = self.crawl_with_stats(start_url).await?;
        Ok(sitemap)
    }

    pub async fn crawl_with_stats(&self, start_url: &str) -> Result<(Sitemap, CrawlStats)> {
        let started = Instant::now();

        let mut parsed = Url::parse(start_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", start_url, e)))?;
        parsed.set_fragment(None);
        let subdomain = subdomain_of(&parsed)
            .ok_or_else(|| ScanError::InvalidUrl(format!("{}: missing host", start_url)))?;

        let delay = fetch_crawl_delay(&self.client, &subdomain).await;
        info!(
            "Starting crawl of {} (scope {}, crawl-delay {:?})",
            start_url, subdomain, delay
        );

        let job = Arc::new(CrawlJob {
            client: self.client.clone(),
            subdomain,
            gate: PolitenessGate::new(delay, self.politeness),
            permits: Semaphore::new(self.max_concurrency),
            visited: Mutex::new(HashSet::new()),
            sitemap: Mutex::new(Sitemap::new()),
            fetched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });

        // seed keyed in normalized form, like every discovered link. The
        // root task joins the whole tree before returning.
        visit(job.clone(), parsed.to_string()).await;

        let sitemap = std::mem::take(&mut *job.sitemap.lock().await);
        let stats = CrawlStats {
            pages_fetched: job.fetched.load(Ordering::Relaxed),
            pages_failed: job.failed.load(Ordering::Relaxed),
            crawl_delay: job.gate.delay(),
            elapsed: started.elapsed(),
        };

        info!(
            "Crawl of {} complete: {} pages, {} failed, {:?}",
            start_url, stats.pages_fetched, stats.pages_failed, stats.elapsed
        );
        Ok((sitemap, stats))
    }
}

/// State of one crawl job, shared by all of its branches.
struct CrawlJob {
    client: Client,
    subdomain: String,
    gate: PolitenessGate,
    permits: Semaphore,
    visited: Mutex<HashSet<String>>,
    sitemap: Mutex<Sitemap>,
    fetched: AtomicUsize,
    failed: AtomicUsize,
}

impl CrawlJob {
    /// Atomic check-and-set; true when the caller is the first to claim `url`.
    async fn claim(&self, url: &str) -> bool {
        let mut visited = self.visited.lock().await;
        visited.insert(url.to_string())
    }

    async fn is_visited(&self, url: &str) -> bool {
        self.visited.lock().await.contains(url)
    }

    async fn record(&self, url: String, links: Vec<String>) {
        self.sitemap.lock().await.insert(url, links);
    }

    /// Fetch, decode and extract one page. Holds a concurrency permit for
    /// the duration of the request only.
    async fn fetch_links(&self, url: &str) -> Result<Vec<String>> {
        let _permit = self.permits.acquire().await.ok();

        self.gate.wait().await;

        debug!("Fetching {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            debug!("{} returned {}", url, response.status());
        }

        let final_url = response.url().clone();
        let encodings = content_encodings(response.headers());
        let body = response.bytes().await?;
        let decoded = decode_body(&body, &encodings)?;
        let html = String::from_utf8_lossy(&decoded);

        Ok(extract_links(&html, &final_url, url, &self.subdomain))
    }
}

/// Visit one page, then every unvisited link on it as concurrent child
/// tasks. Completes only once all children have completed.
fn visit(job: Arc<CrawlJob>, url: String) -> BoxFuture<'static, ()> {
    async move {
        if !url.contains(&job.subdomain) {
            debug!("Skipping {} (outside {})", url, job.subdomain);
            return;
        }

        if !job.claim(&url).await {
            return;
        }

        let links = match job.fetch_links(&url).await {
            Ok(links) => links,
            Err(e) => {
                warn!("Crawl error for {}: {}", url, e);
                job.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        job.fetched.fetch_add(1, Ordering::Relaxed);

        debug!("Links found in {}: {:?}", url, links);
        job.record(url.clone(), links.clone()).await;

        let mut children = JoinSet::new();
        for link in links {
            if job.is_visited(&link).await {
                continue;
            }
            children.spawn(visit(job.clone(), link));
        }

        while let Some(joined) = children.join_next().await {
            if let Err(e) = joined {
                warn!("Crawl task under {} failed: {}", url, e);
            }
        }
    }
    .boxed()
}

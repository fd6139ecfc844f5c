use crate::config::Config;
use crate::gateway::Gateway;
use crate::router::{ClientRegistry, ResultRouter};
use crate::routes::{AppState, build_router};
use crate::worker::Worker;
use anyhow::Context;
use clap::ArgMatches;
use sitemapper_core::nats::{NatsKvCache, NatsQueue};
use sitemapper_core::{JobQueue, MemoryCache, MemoryQueue, SitemapCache};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "sitemapper=debug,sitemapper_core=debug,sitemapper_scanner=debug,tower_http=debug"
    } else {
        "sitemapper=info,sitemapper_core=info,sitemapper_scanner=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn connect_nats(url: &str) -> anyhow::Result<async_nats::Client> {
    let client = async_nats::connect(url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", url))?;
    info!("Connected to NATS at {}", url);
    Ok(client)
}

pub async fn handle_serve(args: &ArgMatches) -> anyhow::Result<()> {
    let config = Config::from_matches(args);
    let client = connect_nats(&config.nats_url).await?;
    let queue: Arc<dyn JobQueue> =
        Arc::new(NatsQueue::new(client.clone()).with_ack_wait(config.ack_wait()));
    let cache: Arc<dyn SitemapCache> = Arc::new(
        NatsKvCache::open(client)
            .await
            .context("Failed to open the sitemap cache")?,
    );
    serve(&config.bind, queue, cache).await
}

pub async fn handle_work(args: &ArgMatches) -> anyhow::Result<()> {
    let config = Config::from_matches(args);
    let client = connect_nats(&config.nats_url).await?;
    let queue: Arc<dyn JobQueue> =
        Arc::new(NatsQueue::new(client).with_ack_wait(config.ack_wait()));

    Worker::new(queue, config.crawler()?)
        .with_jobs(config.jobs)
        .run()
        .await
        .context("Worker stopped")
}

pub async fn handle_standalone(args: &ArgMatches) -> anyhow::Result<()> {
    let config = Config::from_matches(args);
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new());
    let cache: Arc<dyn SitemapCache> = Arc::new(MemoryCache::new());
    queue.setup_topology().await?;

    let worker = Worker::new(queue.clone(), config.crawler()?).with_jobs(config.jobs);
    let worker = tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            error!("Worker stopped: {}", e);
        }
    });

    let result = serve(&config.bind, queue, cache).await;
    worker.abort();
    result
}

pub async fn handle_crawl(args: &ArgMatches) -> anyhow::Result<()> {
    let config = Config::from_matches(args);
    let url = args
        .get_one::<Url>("URL")
        .context("A URL to crawl is required")?;

    let (sitemap, stats) = config
        .crawler()?
        .crawl_with_stats(url.as_str())
        .await
        .with_context(|| format!("Failed to crawl {}", url))?;

    println!("{}", serde_json::to_string_pretty(&sitemap)?);
    info!(
        "{} pages ({} failed) in {:?}, crawl-delay {:?}",
        stats.pages_fetched, stats.pages_failed, stats.elapsed, stats.crawl_delay
    );
    Ok(())
}

/// Serve the HTTP surface and run the delivery loop until ctrl-c.
async fn serve(
    bind: &str,
    queue: Arc<dyn JobQueue>,
    cache: Arc<dyn SitemapCache>,
) -> anyhow::Result<()> {
    let registry = ClientRegistry::new();
    let router = ResultRouter::new(registry.clone(), cache.clone());
    let gateway = Gateway::new(cache, queue.clone());

    let delivery = tokio::spawn({
        let router = router.clone();
        async move {
            if let Err(e) = router.run(queue).await {
                error!("Result router stopped: {}", e);
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on {}", bind);

    let app = build_router(AppState { gateway, router });
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    delivery.abort();
    registry.shutdown().await;
    info!("Shut down");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

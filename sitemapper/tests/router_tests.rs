// Integration tests for the result router and its client registry

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use sitemapper::{ClientConnection, ClientRegistry, ResultRouter};
use sitemapper_core::{
    JobQueue, MemoryCache, MemoryQueue, Request, Response, Sitemap, SitemapCache, Topic, model,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

const SITE: &str = "https://example.com/";

/// Connection double that records everything written to it.
#[derive(Default)]
struct TestConnection {
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
    broken: bool,
}

impl TestConnection {
    fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ClientConnection for TestConnection {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        if self.broken {
            anyhow::bail!("broken pipe");
        }
        self.sent.lock().await.push(payload);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn router_with(cache: Arc<MemoryCache>) -> ResultRouter {
    ResultRouter::new(ClientRegistry::new(), cache)
}

fn router() -> ResultRouter {
    router_with(Arc::new(MemoryCache::new()))
}

fn registration(req_id: &str) -> Bytes {
    model::encode(&Request::with_id(req_id, "")).unwrap()
}

fn result_for(req_id: &str) -> Bytes {
    let mut sitemap = Sitemap::new();
    sitemap.insert(SITE.to_string(), Vec::new());
    model::encode(&Response::ok(Request::with_id(req_id, SITE), sitemap)).unwrap()
}

async fn wait_for_subscribers(registry: &ClientRegistry, req_id: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.subscribers(req_id).await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection never registered");
}

/// Run the registration loop for `conn` over a channel. The inbound side
/// stays open until the returned sender is dropped.
fn open(router: &ResultRouter, conn: Arc<TestConnection>) -> mpsc::UnboundedSender<Bytes> {
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let inbound = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|message| (message, rx))
    });
    let router = router.clone();
    tokio::spawn(async move { router.register_connection(conn, inbound).await });
    tx
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_registry_tracks_registrations() {
    let registry = ClientRegistry::new();
    let a = registry.connect(Arc::new(TestConnection::default())).await;
    let b = registry.connect(Arc::new(TestConnection::default())).await;
    assert_ne!(a, b);
    assert_eq!(registry.len().await, 2);

    // connected but not registered yet
    assert!(registry.subscribers("job-1").await.is_empty());

    assert!(registry.register(a, "job-1").await);
    assert!(registry.register(b, "job-1").await);
    assert_eq!(registry.subscribers("job-1").await.len(), 2);

    // re-registration moves the connection
    assert!(registry.register(b, "job-2").await);
    assert_eq!(registry.subscribers("job-1").await.len(), 1);
    assert_eq!(registry.subscribers("job-2").await.len(), 1);

    assert!(registry.unregister(a).await.is_some());
    assert!(!registry.register(a, "job-1").await);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_registries_are_isolated() {
    let first = ClientRegistry::new();
    let second = ClientRegistry::new();
    first.connect(Arc::new(TestConnection::default())).await;
    assert_eq!(first.len().await, 1);
    assert!(second.is_empty().await);
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let registry = ClientRegistry::new();
    let conn = Arc::new(TestConnection::default());
    registry.connect(conn.clone()).await;

    registry.shutdown().await;
    assert!(registry.is_empty().await);
    assert!(conn.closed.load(Ordering::SeqCst));
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_result_reaches_only_its_connection() {
    let router = router();
    let waiting = Arc::new(TestConnection::default());
    let other = Arc::new(TestConnection::default());

    let a = open(&router, waiting.clone());
    let b = open(&router, other.clone());
    a.send(registration("job-1")).unwrap();
    b.send(registration("job-2")).unwrap();
    wait_for_subscribers(router.registry(), "job-1", 1).await;
    wait_for_subscribers(router.registry(), "job-2", 1).await;

    let payload = result_for("job-1");
    assert_eq!(router.deliver(&payload).await, 1);

    assert_eq!(waiting.sent().await, vec![payload]);
    assert!(other.sent().await.is_empty());
}

#[tokio::test]
async fn test_shared_correlation_id_reaches_every_connection() {
    let router = router();
    let first = Arc::new(TestConnection::default());
    let reconnect = Arc::new(TestConnection::default());

    let a = open(&router, first.clone());
    let b = open(&router, reconnect.clone());
    a.send(registration("job-1")).unwrap();
    b.send(registration("job-1")).unwrap();
    wait_for_subscribers(router.registry(), "job-1", 2).await;

    assert_eq!(router.deliver(&result_for("job-1")).await, 2);
    assert_eq!(first.sent().await.len(), 1);
    assert_eq!(reconnect.sent().await.len(), 1);
}

#[tokio::test]
async fn test_nobody_waiting_drops_the_result() {
    let router = router();
    assert_eq!(router.deliver(&result_for("job-1")).await, 0);

    // a late subscriber gets no replay
    let late = Arc::new(TestConnection::default());
    let tx = open(&router, late.clone());
    tx.send(registration("job-1")).unwrap();
    wait_for_subscribers(router.registry(), "job-1", 1).await;
    assert!(late.sent().await.is_empty());
}

#[tokio::test]
async fn test_failed_write_prunes_and_closes() {
    let router = router();
    let dead = Arc::new(TestConnection::broken());
    let alive = Arc::new(TestConnection::default());

    let a = open(&router, dead.clone());
    let b = open(&router, alive.clone());
    a.send(registration("job-1")).unwrap();
    b.send(registration("job-1")).unwrap();
    wait_for_subscribers(router.registry(), "job-1", 2).await;

    assert_eq!(router.deliver(&result_for("job-1")).await, 1);
    assert!(dead.closed.load(Ordering::SeqCst));
    assert!(!alive.closed.load(Ordering::SeqCst));
    assert_eq!(router.registry().subscribers("job-1").await.len(), 1);
    assert_eq!(router.registry().len().await, 1);
}

#[tokio::test]
async fn test_malformed_response_is_skipped() {
    let router = router();
    let conn = Arc::new(TestConnection::default());
    let tx = open(&router, conn.clone());
    tx.send(registration("job-1")).unwrap();
    wait_for_subscribers(router.registry(), "job-1", 1).await;

    assert_eq!(router.deliver(&Bytes::from_static(b"{oops")).await, 0);
    assert_eq!(router.deliver(&result_for("job-1")).await, 1);
}

#[tokio::test]
async fn test_completed_sitemap_is_cached() {
    let cache = Arc::new(MemoryCache::new());
    let router = router_with(cache.clone());

    router.deliver(&result_for("job-1")).await;

    let blob = cache.get(SITE).await.unwrap().expect("sitemap cached");
    let sitemap: Sitemap = model::decode(blob.as_bytes()).unwrap();
    assert!(sitemap.contains_page(SITE));
}

#[tokio::test]
async fn test_error_response_is_not_cached() {
    let cache = Arc::new(MemoryCache::new());
    let router = router_with(cache.clone());

    let payload = model::encode(&Response::error(Request::with_id("job-1", SITE))).unwrap();
    router.deliver(&payload).await;
    assert_eq!(cache.len().await, 0);
}

// ============================================================================
// Registration loop
// ============================================================================

#[tokio::test]
async fn test_closed_connection_is_unregistered() {
    let router = router();
    let conn = Arc::new(TestConnection::default());
    let tx = open(&router, conn);
    tx.send(registration("job-1")).unwrap();
    wait_for_subscribers(router.registry(), "job-1", 1).await;

    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !router.registry().is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection never unregistered");
}

#[tokio::test]
async fn test_malformed_registration_stops_reading_but_keeps_connection() {
    let router = router();
    let conn = Arc::new(TestConnection::default());
    let inbound = stream::iter(vec![
        registration("job-1"),
        Bytes::from_static(b"garbage"),
        registration("job-2"),
    ]);

    router.register_connection(conn.clone(), inbound).await;

    // still registered under the last good id, never moved to job-2
    assert_eq!(router.registry().subscribers("job-1").await.len(), 1);
    assert!(router.registry().subscribers("job-2").await.is_empty());
    assert!(!conn.closed.load(Ordering::SeqCst));
}

// ============================================================================
// Delivery loop
// ============================================================================

#[tokio::test]
async fn test_run_forwards_queued_results() {
    let queue = Arc::new(MemoryQueue::new());
    queue.setup_topology().await.unwrap();
    let router = router();

    let conn = Arc::new(TestConnection::default());
    let tx = open(&router, conn.clone());
    tx.send(registration("job-1")).unwrap();
    wait_for_subscribers(router.registry(), "job-1", 1).await;

    let loop_router = router.clone();
    let loop_queue = queue.clone();
    let delivery = tokio::spawn(async move { loop_router.run(loop_queue).await });

    queue
        .publish(Topic::Responses, Bytes::from_static(b"not json"))
        .await
        .unwrap();
    queue
        .publish(Topic::Responses, result_for("job-1"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while conn.sent().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("result never delivered");

    let received: Response = model::decode(&conn.sent().await[0]).unwrap();
    assert_eq!(received.req_id(), "job-1");
    delivery.abort();
}

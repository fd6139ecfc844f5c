//! Result router: matches finished crawl results to the client connections
//! waiting on their correlation identifier.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use sitemapper_core::model;
use sitemapper_core::{JobQueue, QueueError, Request, Response, SitemapCache, Status, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub type ConnectionId = u64;

/// Write half of a client connection.
#[async_trait]
pub trait ClientConnection: Send + Sync {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()>;

    async fn close(&self);
}

struct Client {
    conn: Arc<dyn ClientConnection>,
    req_id: Option<String>,
}

/// Live connections and the correlation identifier each one waits on.
///
/// Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ConnectionId, Client>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection. It receives nothing until [`register`](Self::register).
    pub async fn connect(&self, conn: Arc<dyn ClientConnection>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .write()
            .await
            .insert(id, Client { conn, req_id: None });
        id
    }

    /// Point a connection at `req_id`, replacing any earlier registration.
    /// Returns false if the connection is gone.
    pub async fn register(&self, id: ConnectionId, req_id: &str) -> bool {
        match self.clients.write().await.get_mut(&id) {
            Some(client) => {
                client.req_id = Some(req_id.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn unregister(&self, id: ConnectionId) -> Option<Arc<dyn ClientConnection>> {
        self.clients.write().await.remove(&id).map(|client| client.conn)
    }

    /// Snapshot of every connection registered under `req_id`.
    pub async fn subscribers(&self, req_id: &str) -> Vec<(ConnectionId, Arc<dyn ClientConnection>)> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|(_, client)| client.req_id.as_deref() == Some(req_id))
            .map(|(id, client)| (*id, client.conn.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Close and forget every connection.
    pub async fn shutdown(&self) {
        let clients: Vec<_> = self.clients.write().await.drain().collect();
        for (_, client) in clients {
            client.conn.close().await;
        }
    }
}

#[derive(Clone)]
pub struct ResultRouter {
    registry: ClientRegistry,
    cache: Arc<dyn SitemapCache>,
}

impl ResultRouter {
    pub fn new(registry: ClientRegistry, cache: Arc<dyn SitemapCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Registration loop for one connection.
    ///
    /// Every inbound message is a `Request` envelope naming the correlation
    /// identifier to wait on. A malformed message ends the loop but leaves the
    /// connection registered; it is pruned on the next failed write. The
    /// connection is dropped from the registry when `inbound` ends.
    pub async fn register_connection<S>(&self, conn: Arc<dyn ClientConnection>, inbound: S)
    where
        S: Stream<Item = Bytes> + Send,
    {
        let id = self.registry.connect(conn).await;
        debug!("Connection {} opened", id);

        let mut inbound = std::pin::pin!(inbound);
        while let Some(message) = inbound.next().await {
            let request = match model::decode::<Request>(&message) {
                Ok(request) if !request.req_id.is_empty() => request,
                Ok(_) => {
                    warn!("Connection {} sent a registration without reqId", id);
                    return;
                }
                Err(e) => {
                    warn!("Connection {} sent a malformed registration: {}", id, e);
                    return;
                }
            };

            if self.registry.register(id, &request.req_id).await {
                debug!("Connection {} waiting on {}", id, request.req_id);
            }
        }

        self.registry.unregister(id).await;
        debug!("Connection {} closed", id);
    }

    /// Handle one serialized `Response` from the queue and return how many
    /// connections it reached.
    ///
    /// Completed sitemaps are stored in the cache under their request URL.
    /// Connections whose write fails are removed and closed.
    pub async fn deliver(&self, payload: &Bytes) -> usize {
        let response = match model::decode::<Response>(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping malformed response: {}", e);
                return 0;
            }
        };

        self.store(&response).await;

        let subscribers = self.registry.subscribers(response.req_id()).await;
        if subscribers.is_empty() {
            debug!("No connection waiting on {}, dropping result", response.req_id());
            return 0;
        }

        let mut delivered = 0;
        for (id, conn) in subscribers {
            match conn.send(payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Write to connection {} failed, pruning: {}", id, e);
                    if let Some(conn) = self.registry.unregister(id).await {
                        conn.close().await;
                    }
                }
            }
        }

        debug!(
            "Delivered {} to {} connection(s)",
            response.req_id(),
            delivered
        );
        delivered
    }

    async fn store(&self, response: &Response) {
        let sitemap = match (&response.status, &response.sitemap) {
            (Status::Ok, Some(sitemap)) if !response.request.url.is_empty() => sitemap,
            _ => return,
        };

        let blob = match serde_json::to_string(sitemap) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Could not serialize sitemap for {}: {}", response.request.url, e);
                return;
            }
        };

        if let Err(e) = self.cache.set(&response.request.url, &blob).await {
            warn!("Could not cache sitemap for {}: {}", response.request.url, e);
        }
    }

    /// Delivery loop. Runs until the response topic ends.
    pub async fn run(&self, queue: Arc<dyn JobQueue>) -> Result<(), QueueError> {
        if let Err(e) = queue.setup_topology().await {
            error!("Could not set up queue topology: {}", e);
            return Err(e);
        }
        let mut deliveries = queue.consume(Topic::Responses).await?;
        info!("Result router consuming {}", Topic::Responses);

        while let Some(delivery) = deliveries.next().await {
            self.deliver(&delivery.payload).await;
            if let Err(e) = delivery.ack().await {
                warn!("Could not ack response: {}", e);
            }
        }

        info!("Response topic closed, result router stopping");
        Ok(())
    }
}

//! Job queue between the request side and the crawl workers.
//!
//! Two topics, delivered in order and at least once. Consumers acknowledge a
//! [`Delivery`] after handling it; a delivery that is never acknowledged may
//! be seen again.

use crate::error::QueueError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Gateway -> workers, carries `Request` envelopes.
    Requests,
    /// Workers -> result router, carries `Response` envelopes.
    Responses,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Requests, Topic::Responses];

    pub fn subject(&self) -> &'static str {
        match self {
            Topic::Requests => "sitemapper.requests",
            Topic::Responses => "sitemapper.responses",
        }
    }

    /// Name of the durable consumer reading this topic.
    pub fn consumer_name(&self) -> &'static str {
        match self {
            Topic::Requests => "sitemapper-requests",
            Topic::Responses => "sitemapper-responses",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}

/// Transport-specific acknowledgement of one delivery.
#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
}

/// One message taken off a topic.
pub struct Delivery {
    pub payload: Bytes,
    acker: Option<Box<dyn Acknowledge>>,
}

impl Delivery {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            acker: None,
        }
    }

    pub fn with_acker(payload: Bytes, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            payload,
            acker: Some(acker),
        }
    }

    /// Acknowledge the delivery. No-op for transports without acks.
    pub async fn ack(self) -> Result<(), QueueError> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &self.payload)
            .field("ackable", &self.acker.is_some())
            .finish()
    }
}

/// Endless stream of deliveries for one topic.
pub type Deliveries = BoxStream<'static, Delivery>;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Declare topics and consumers. Idempotent; call before publishing or
    /// consuming.
    async fn setup_topology(&self) -> Result<(), QueueError>;

    async fn publish(&self, topic: Topic, payload: Bytes) -> Result<(), QueueError>;

    /// Start consuming a topic. The returned stream never ends on its own
    /// and cannot be restarted once taken.
    async fn consume(&self, topic: Topic) -> Result<Deliveries, QueueError>;
}

struct Channel {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

/// In-process queue over unbounded channels, for tests and single-process
/// deployments.
#[derive(Default)]
pub struct MemoryQueue {
    topics: Mutex<HashMap<Topic, Channel>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn setup_topology(&self) -> Result<(), QueueError> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        for topic in Topic::ALL {
            topics.entry(topic).or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                Channel { tx, rx: Some(rx) }
            });
        }
        Ok(())
    }

    async fn publish(&self, topic: Topic, payload: Bytes) -> Result<(), QueueError> {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let channel = topics
            .get(&topic)
            .ok_or(QueueError::TopologyMissing(topic))?;
        channel
            .tx
            .send(payload)
            .map_err(|_| QueueError::Closed(topic))
    }

    async fn consume(&self, topic: Topic) -> Result<Deliveries, QueueError> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let channel = topics
            .get_mut(&topic)
            .ok_or(QueueError::TopologyMissing(topic))?;
        let rx = channel.rx.take().ok_or(QueueError::AlreadyConsumed(topic))?;

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (Delivery::new(payload), rx))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_publish_before_setup_fails() {
        let queue = MemoryQueue::new();
        let err = queue
            .publish(Topic::Requests, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::TopologyMissing(Topic::Requests)));
        assert!(matches!(
            queue.consume(Topic::Responses).await,
            Err(QueueError::TopologyMissing(Topic::Responses))
        ));
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let queue = MemoryQueue::new();
        queue.setup_topology().await.unwrap();
        queue
            .publish(Topic::Requests, Bytes::from_static(b"first"))
            .await
            .unwrap();

        // a second setup must not drop what is already queued
        queue.setup_topology().await.unwrap();

        let mut deliveries = queue.consume(Topic::Requests).await.unwrap();
        let delivery = deliveries.next().await.unwrap();
        assert_eq!(delivery.payload, Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_topics_are_ordered_and_separate() {
        let queue = MemoryQueue::new();
        queue.setup_topology().await.unwrap();

        for payload in ["one", "two", "three"] {
            queue
                .publish(Topic::Responses, Bytes::from(payload))
                .await
                .unwrap();
        }

        let mut requests = queue.consume(Topic::Requests).await.unwrap();
        assert!(requests.next().now_or_never().is_none());

        let mut responses = queue.consume(Topic::Responses).await.unwrap();
        for expected in ["one", "two", "three"] {
            let delivery = responses.next().await.unwrap();
            assert_eq!(delivery.payload, Bytes::from(expected));
            delivery.ack().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_consume_is_not_restartable() {
        let queue = MemoryQueue::new();
        queue.setup_topology().await.unwrap();

        let _deliveries = queue.consume(Topic::Requests).await.unwrap();
        assert!(matches!(
            queue.consume(Topic::Requests).await,
            Err(QueueError::AlreadyConsumed(Topic::Requests))
        ));
    }
}

//! NATS JetStream adapters for the job queue and the sitemap cache.

use crate::cache::{SitemapCache, cache_key};
use crate::error::{CacheError, QueueError};
use crate::queue::{Acknowledge, Deliveries, Delivery, JobQueue, Topic};
use async_nats::jetstream::{self, consumer, kv};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

pub const STREAM_NAME: &str = "SITEMAPPER";
pub const CACHE_BUCKET: &str = "sitemapper-cache";

/// Redelivery deadline for crawl requests. A request is acked only after its
/// crawl finishes, so this bounds the longest crawl that runs once.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(600);

fn broker(e: impl std::fmt::Display) -> QueueError {
    QueueError::Broker(e.to_string())
}

fn backend(e: impl std::fmt::Display) -> CacheError {
    CacheError::Backend(e.to_string())
}

/// Durable job queue on a JetStream stream with one pull consumer per topic.
pub struct NatsQueue {
    jetstream: jetstream::Context,
    ack_wait: Duration,
}

impl NatsQueue {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
            ack_wait: DEFAULT_ACK_WAIT,
        }
    }

    /// Ack deadline of the request consumer. Only applies when the consumer
    /// is created; an existing durable consumer keeps its settings.
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }
}

/// Durable pull consumer for `topic`. Responses are acked as soon as they are
/// delivered and keep the server default deadline.
fn consumer_config(topic: Topic, ack_wait: Duration) -> consumer::pull::Config {
    let mut config = consumer::pull::Config {
        durable_name: Some(topic.consumer_name().to_string()),
        filter_subject: topic.subject().to_string(),
        ack_policy: consumer::AckPolicy::Explicit,
        ..Default::default()
    };
    if topic == Topic::Requests {
        config.ack_wait = ack_wait;
    }
    config
}

struct JetStreamAck(jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.0.ack().await.map_err(broker)
    }
}

#[async_trait]
impl JobQueue for NatsQueue {
    async fn setup_topology(&self) -> Result<(), QueueError> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: Topic::ALL
                    .iter()
                    .map(|topic| topic.subject().to_string())
                    .collect(),
                ..Default::default()
            })
            .await
            .map_err(broker)?;

        for topic in Topic::ALL {
            stream
                .get_or_create_consumer(
                    topic.consumer_name(),
                    consumer_config(topic, self.ack_wait),
                )
                .await
                .map_err(broker)?;
        }

        debug!("JetStream topology ready ({})", STREAM_NAME);
        Ok(())
    }

    async fn publish(&self, topic: Topic, payload: Bytes) -> Result<(), QueueError> {
        self.jetstream
            .publish(topic.subject(), payload)
            .await
            .map_err(broker)?
            .await
            .map_err(broker)?;
        Ok(())
    }

    async fn consume(&self, topic: Topic) -> Result<Deliveries, QueueError> {
        let stream = self
            .jetstream
            .get_stream(STREAM_NAME)
            .await
            .map_err(|_| QueueError::TopologyMissing(topic))?;
        let consumer: consumer::PullConsumer = stream
            .get_consumer(topic.consumer_name())
            .await
            .map_err(|_| QueueError::TopologyMissing(topic))?;
        let messages = consumer.messages().await.map_err(broker)?;

        Ok(messages
            .filter_map(move |message| {
                futures::future::ready(match message {
                    Ok(message) => {
                        let payload = message.payload.clone();
                        Some(Delivery::with_acker(payload, Box::new(JetStreamAck(message))))
                    }
                    Err(e) => {
                        warn!("Error receiving from {}: {}", topic, e);
                        None
                    }
                })
            })
            .boxed())
    }
}

/// Sitemap cache on a JetStream key/value bucket. URLs are hashed with
/// [`cache_key`] because KV keys only allow a restricted alphabet.
pub struct NatsKvCache {
    store: kv::Store,
}

impl NatsKvCache {
    pub async fn open(client: async_nats::Client) -> Result<Self, CacheError> {
        let jetstream = jetstream::new(client);
        let store = match jetstream.get_key_value(CACHE_BUCKET).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(kv::Config {
                    bucket: CACHE_BUCKET.to_string(),
                    history: 1,
                    ..Default::default()
                })
                .await
                .map_err(backend)?,
        };
        Ok(Self { store })
    }
}

#[async_trait]
impl SitemapCache for NatsKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entry = self.store.get(cache_key(key)).await.map_err(backend)?;
        entry
            .map(|value| String::from_utf8(value.to_vec()).map_err(backend))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.store
            .put(cache_key(key), Bytes::from(value.to_string()))
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_consumer_outlives_long_crawls() {
        let config = consumer_config(Topic::Requests, DEFAULT_ACK_WAIT);
        assert_eq!(config.ack_wait, DEFAULT_ACK_WAIT);
        assert_eq!(config.durable_name.as_deref(), Some("sitemapper-requests"));
        assert_eq!(config.filter_subject, "sitemapper.requests");

        let custom = consumer_config(Topic::Requests, Duration::from_secs(3600));
        assert_eq!(custom.ack_wait, Duration::from_secs(3600));
    }

    #[test]
    fn test_response_consumer_keeps_default_deadline() {
        let config = consumer_config(Topic::Responses, DEFAULT_ACK_WAIT);
        assert_eq!(config.ack_wait, consumer::pull::Config::default().ack_wait);
        assert_eq!(config.filter_subject, "sitemapper.responses");
    }
}

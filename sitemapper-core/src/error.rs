use crate::queue::Topic;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Topology for {0} has not been set up")]
    TopologyMissing(Topic),

    #[error("{0} is already being consumed")]
    AlreadyConsumed(Topic),

    #[error("{0} is closed")]
    Closed(Topic),

    #[error("Could not encode payload: {0}")]
    Encode(#[from] ModelError),

    #[error("Broker error: {0}")]
    Broker(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
}

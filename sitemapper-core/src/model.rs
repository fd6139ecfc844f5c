//! Wire envelopes shared by the gateway, the workers and the result router.
//!
//! Field names (`reqId`, `url`, `status`, `pages`) are stable across every
//! process boundary.

use crate::error::ModelError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use sitemapper_scanner::Sitemap;

/// A crawl request, correlated to its eventual result by `req_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "reqId", default, skip_serializing_if = "String::is_empty")]
    pub req_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl Request {
    /// New request for `url` with a freshly minted correlation identifier.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            req_id: new_correlation_id(),
            url: url.into(),
        }
    }

    pub fn with_id(req_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            req_id: req_id.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Accepted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request: Request,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sitemap: Option<Sitemap>,
}

impl Response {
    pub fn ok(request: Request, sitemap: Sitemap) -> Self {
        Self {
            request,
            status: Status::Ok,
            sitemap: Some(sitemap),
        }
    }

    /// Queued, result still pending; never carries a sitemap.
    pub fn accepted(request: Request) -> Self {
        Self {
            request,
            status: Status::Accepted,
            sitemap: None,
        }
    }

    pub fn error(request: Request) -> Self {
        Self {
            request,
            status: Status::Error,
            sitemap: None,
        }
    }

    pub fn req_id(&self) -> &str {
        &self.request.req_id
    }
}

/// Opaque correlation identifier (UUID v4).
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn encode<T: Serialize>(envelope: &T) -> Result<Bytes, ModelError> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ModelError> {
    Ok(serde_json::from_slice(payload)?)
}

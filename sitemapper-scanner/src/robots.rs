//! Crawl-delay discovery and the politeness gate applied before each page fetch.

use crate::decode::decode_body;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// How the crawl delay is enforced across the concurrent branches of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Politeness {
    /// One gate per job: fetches are spaced `delay` apart no matter how
    /// many branches are running.
    #[default]
    Shared,
    /// Every branch sleeps `delay` before its own fetch. Parallel branches
    /// therefore fetch in bursts.
    PerBranch,
}

/// Read the first `Crawl-delay:` directive of a robots file, in seconds.
///
/// Directive names are matched case-insensitively. An unparsable value
/// yields 0, as does a file without the directive.
pub fn parse_crawl_delay(robots: &str) -> u64 {
    for line in robots.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("crawl-delay") {
            continue;
        }

        return match value.trim().parse::<u64>() {
            Ok(delay) => delay,
            Err(e) => {
                warn!("Invalid crawl-delay value {:?}: {}", value.trim(), e);
                0
            }
        };
    }

    0
}

/// Fetch `<subdomain>/robots.txt` and derive the crawl delay.
///
/// Any failure (network, status, decoding) degrades to no delay.
pub async fn fetch_crawl_delay(client: &Client, subdomain: &str) -> Duration {
    let robots_url = format!("{}/robots.txt", subdomain);

    let response = match client.get(&robots_url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("Could not fetch {}: {}", robots_url, e);
            return Duration::ZERO;
        }
    };

    if !response.status().is_success() {
        debug!("{} returned {}", robots_url, response.status());
        return Duration::ZERO;
    }

    let encodings = crate::decode::content_encodings(response.headers());
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            debug!("Could not read {}: {}", robots_url, e);
            return Duration::ZERO;
        }
    };

    match decode_body(&body, &encodings) {
        Ok(text) => Duration::from_secs(parse_crawl_delay(&String::from_utf8_lossy(&text))),
        Err(e) => {
            debug!("Could not decode {}: {}", robots_url, e);
            Duration::ZERO
        }
    }
}

/// Politeness gate shared by all branches of one crawl job.
#[derive(Clone)]
pub struct PolitenessGate {
    delay: Duration,
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl PolitenessGate {
    pub fn new(delay: Duration, mode: Politeness) -> Self {
        let limiter = match mode {
            Politeness::Shared => Quota::with_period(delay)
                .map(|quota| Arc::new(RateLimiter::direct(quota))),
            Politeness::PerBranch => None,
        };

        Self { delay, limiter }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait until the next fetch is allowed.
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }

        match &self.limiter {
            Some(limiter) => limiter.until_ready().await,
            None => tokio::time::sleep(self.delay).await,
        }
    }
}

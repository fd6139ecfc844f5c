use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Page -> outbound same-subdomain links, as produced by one crawl job.
///
/// Keys are pages that were actually fetched. A fetched page without links
/// maps to an empty list, which serializes as `[]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sitemap {
    #[serde(default)]
    pub pages: BTreeMap<String, Vec<String>>,
}

impl Sitemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page: String, links: Vec<String>) {
        self.pages.insert(page, links);
    }

    pub fn links(&self, page: &str) -> Option<&[String]> {
        self.pages.get(page).map(Vec::as_slice)
    }

    pub fn contains_page(&self, page: &str) -> bool {
        self.pages.contains_key(page)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Counters for a finished crawl job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub crawl_delay: Duration,
    pub elapsed: Duration,
}

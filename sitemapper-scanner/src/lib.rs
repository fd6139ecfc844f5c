pub mod crawler;
pub mod decode;
pub mod error;
pub mod links;
pub mod result;
pub mod robots;

pub use crawler::Crawler;
pub use error::ScanError;
pub use result::{CrawlStats, Sitemap};
pub use robots::Politeness;

pub mod cache;
pub mod error;
pub mod model;
pub mod nats;
pub mod queue;

pub use cache::{MemoryCache, SitemapCache};
pub use error::{CacheError, ModelError, QueueError};
pub use model::{Request, Response, Sitemap, Status};
pub use queue::{Deliveries, Delivery, JobQueue, MemoryQueue, Topic};

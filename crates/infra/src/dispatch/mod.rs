//! Work-queue dispatcher backends.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_queue;

pub use in_memory::InMemoryDispatcher;
#[cfg(feature = "redis")]
pub use redis_queue::RedisQueueDispatcher;

/// Default queue route consumed by the executor pool.
pub const DEFAULT_ROUTE: &str = "docrelay:jobs:ocr";

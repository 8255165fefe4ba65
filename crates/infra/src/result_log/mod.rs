//! Result log backends.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::InMemoryResultLog;
#[cfg(feature = "redis")]
pub use redis_streams::RedisResultLog;

/// Default retention per log (most-recent entries kept). Deployment-wide,
/// not per log instance.
pub const DEFAULT_MAX_LEN: usize = 1000;

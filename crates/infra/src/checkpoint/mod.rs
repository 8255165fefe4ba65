//! Checkpoint store backends.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryCheckpointStore;
#[cfg(feature = "redis")]
pub use redis::RedisCheckpointStore;

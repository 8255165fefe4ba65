//! `docrelay-infra` — backend implementations for the relay seams.
//!
//! In-memory implementations serve dev and tests; Redis-backed ones (feature
//! `redis`) serve deployments: a Redis Stream per result log (XADD with
//! MAXLEN retention), a Redis hash for checkpoints, a Redis list as the work
//! queue route.

pub mod checkpoint;
pub mod dispatch;
pub mod result_log;


pub use checkpoint::InMemoryCheckpointStore;
pub use dispatch::InMemoryDispatcher;
pub use result_log::InMemoryResultLog;

#[cfg(feature = "redis")]
pub use checkpoint::RedisCheckpointStore;
#[cfg(feature = "redis")]
pub use dispatch::RedisQueueDispatcher;
#[cfg(feature = "redis")]
pub use result_log::RedisResultLog;

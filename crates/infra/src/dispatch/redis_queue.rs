//! Redis list-backed work queue dispatcher.
//!
//! LPUSH of the JSON-encoded descriptor onto a named route key; the executor
//! pool consumes with BRPOP. The descriptor carries the caller-fixed job id
//! inside the message, so correlation survives whatever id scheme the queue
//! or executor uses internally.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use docrelay_relay::{DispatchError, JobDescriptor, JobDispatcher};

use super::DEFAULT_ROUTE;

#[derive(Clone)]
pub struct RedisQueueDispatcher {
    conn: MultiplexedConnection,
    route: String,
}

impl RedisQueueDispatcher {
    pub async fn connect(redis_url: &str, route: Option<String>) -> Result<Self, DispatchError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn,
            route: route.unwrap_or_else(|| DEFAULT_ROUTE.to_string()),
        })
    }
}

#[async_trait]
impl JobDispatcher for RedisQueueDispatcher {
    async fn submit(&self, descriptor: JobDescriptor) -> Result<(), DispatchError> {
        let message =
            serde_json::to_string(&descriptor).map_err(|e| DispatchError::Encode(e.to_string()))?;

        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("LPUSH")
            .arg(&self.route)
            .arg(&message)
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Unavailable(format!("LPUSH failed: {e}")))?;

        debug!(job_id = %descriptor.job_id, route = %self.route, "job enqueued");
        Ok(())
    }
}

//! Redis hash-backed checkpoint store.
//!
//! One hash keyed by client id; HSET is atomic per field, which serializes
//! writes to a client's checkpoint.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use docrelay_core::ClientId;
use docrelay_relay::{CheckpointError, CheckpointStore, Position};

/// Default hash holding all client checkpoints.
const DEFAULT_CHECKPOINT_KEY: &str = "docrelay:checkpoints";

#[derive(Clone)]
pub struct RedisCheckpointStore {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisCheckpointStore {
    pub async fn connect(redis_url: &str, key: Option<String>) -> Result<Self, CheckpointError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CheckpointError(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CheckpointError(e.to_string()))?;
        Ok(Self {
            conn,
            key: key.unwrap_or_else(|| DEFAULT_CHECKPOINT_KEY.to_string()),
        })
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn get(&self, client: &ClientId) -> Result<Option<Position>, CheckpointError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("HGET")
            .arg(&self.key)
            .arg(client.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckpointError(format!("HGET failed: {e}")))?;

        match raw {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| CheckpointError(format!("unparsable checkpoint: {raw}"))),
            None => Ok(None),
        }
    }

    async fn set(&self, client: &ClientId, position: Position) -> Result<(), CheckpointError> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("HSET")
            .arg(&self.key)
            .arg(client.as_str())
            .arg(position.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckpointError(format!("HSET failed: {e}")))?;
        Ok(())
    }
}

//! Redis Streams-backed result log.
//!
//! One Redis Stream per client log. XADD with `MAXLEN ~ N` gives the bounded
//! FIFO retention (approximate trimming, as Redis recommends — the log may
//! briefly hold slightly more than N); stream ids (`"<ms>-<seq>"`) are the
//! positions. Redis serializes appends per key, which provides the atomic
//! position assignment the log contract requires.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use docrelay_relay::{LogCursor, LogEntry, LogError, Position, ResultEnvelope, ResultLog};

use super::DEFAULT_MAX_LEN;

/// Field under which the envelope JSON is stored in each stream entry.
const DATA_FIELD: &str = "data";

#[derive(Clone)]
pub struct RedisResultLog {
    conn: MultiplexedConnection,
    max_len: usize,
}

impl RedisResultLog {
    /// Connect to Redis. `max_len` is the deployment-wide retention.
    pub async fn connect(redis_url: &str, max_len: Option<usize>) -> Result<Self, LogError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| LogError::Transient(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LogError::Transient(e.to_string()))?;
        Ok(Self {
            conn,
            max_len: max_len.unwrap_or(DEFAULT_MAX_LEN),
        })
    }
}

fn cursor_token(cursor: &LogCursor) -> String {
    match cursor {
        LogCursor::Beginning => "0-0".to_string(),
        LogCursor::After(p) => p.to_string(),
    }
}

#[async_trait]
impl ResultLog for RedisResultLog {
    async fn append(
        &self,
        log_name: &str,
        envelope: ResultEnvelope,
    ) -> Result<Position, LogError> {
        let payload =
            serde_json::to_string(&envelope).map_err(|e| LogError::Codec(e.to_string()))?;

        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(log_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| LogError::Transient(format!("XADD failed: {e}")))?;

        id.parse()
            .map_err(|_| LogError::Codec(format!("unparsable stream id: {id}")))
    }

    async fn read_after(
        &self,
        log_name: &str,
        cursor: &LogCursor,
        max_count: usize,
        _timeout: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        // No BLOCK here: the connection is multiplexed across all relays, so
        // a blocking read would stall unrelated traffic. The relay's poll
        // pacing supplies the bounded wait instead.
        let mut conn = self.conn.clone();
        let reply: Option<Vec<(String, Vec<(String, HashMap<String, String>)>)>> =
            redis::cmd("XREAD")
                .arg("COUNT")
                .arg(max_count)
                .arg("STREAMS")
                .arg(log_name)
                .arg(cursor_token(cursor))
                .query_async(&mut conn)
                .await
                .map_err(|e| LogError::Transient(format!("XREAD failed: {e}")))?;

        let Some(streams) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for (_stream, items) in streams {
            for (id, fields) in items {
                let position: Position = id
                    .parse()
                    .map_err(|_| LogError::Codec(format!("unparsable stream id: {id}")))?;
                let payload = fields
                    .get(DATA_FIELD)
                    .ok_or_else(|| LogError::Codec(format!("entry {id} missing data field")))?;
                let envelope: ResultEnvelope = serde_json::from_str(payload)
                    .map_err(|e| LogError::Codec(format!("entry {id}: {e}")))?;
                entries.push(LogEntry { position, envelope });
            }
        }
        Ok(entries)
    }
}

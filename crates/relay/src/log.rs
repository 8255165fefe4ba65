//! Durable, bounded, per-client result log abstraction.

use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::{LogEntry, Position, ResultEnvelope};

/// Resume cursor for a log read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCursor {
    /// Start from the oldest retained entry.
    Beginning,
    /// Entries strictly after this position.
    After(Position),
}

impl LogCursor {
    /// Advance past a delivered entry.
    pub fn advance(&mut self, position: Position) {
        *self = LogCursor::After(position);
    }
}

impl From<Option<Position>> for LogCursor {
    fn from(value: Option<Position>) -> Self {
        match value {
            Some(p) => LogCursor::After(p),
            None => LogCursor::Beginning,
        }
    }
}

/// Result log backend error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogError {
    /// Backend temporarily unreachable; callers retry with bounded backoff.
    #[error("log backend unavailable: {0}")]
    Transient(String),

    /// A stored entry could not be encoded or decoded.
    #[error("log entry codec failure: {0}")]
    Codec(String),
}

/// Append-only, position-ordered, retention-bounded store of result
/// envelopes, one independent log per client.
///
/// Retention: each log keeps at most N most-recent entries (deployment-wide
/// N, FIFO eviction by position). Eviction may discard entries a slow
/// consumer has not read yet; a reader whose cursor predates the oldest
/// retained entry resumes from that oldest entry. That lossy window is part
/// of this contract, not a bug in implementations.
#[async_trait]
pub trait ResultLog: Send + Sync {
    /// Atomically assign the next position in `log_name` and store the
    /// envelope, evicting the oldest entry when the log is full. Concurrent
    /// appends to one log are serialized by the implementation.
    async fn append(&self, log_name: &str, envelope: ResultEnvelope)
    -> Result<Position, LogError>;

    /// Entries with position strictly greater than `cursor`, in position
    /// order, up to `max_count`.
    ///
    /// When no entry is available the call may block up to `timeout` before
    /// returning empty; implementations without a native bounded wait return
    /// immediately and rely on the caller's poll pacing. Either way the call
    /// never blocks past `timeout`.
    async fn read_after(
        &self,
        log_name: &str,
        cursor: &LogCursor,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<LogEntry>, LogError>;
}

//! In-memory bounded result log for dev/tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use docrelay_relay::{LogCursor, LogEntry, LogError, Position, ResultEnvelope, ResultLog};

use super::DEFAULT_MAX_LEN;

struct LogState {
    next_seq: u64,
    entries: VecDeque<LogEntry>,
}

struct LogInner {
    state: Mutex<LogState>,
    /// Wakes readers parked in `read_after` when an append lands.
    appended: Notify,
}

impl LogInner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LogState {
                next_seq: 0,
                entries: VecDeque::new(),
            }),
            appended: Notify::new(),
        })
    }
}

/// Bounded per-log `VecDeque` store with a native bounded blocking read.
///
/// Position assignment is a per-log counter guarded by the log's mutex, so
/// concurrent appends are serialized and positions are strictly increasing.
pub struct InMemoryResultLog {
    max_len: usize,
    logs: Mutex<HashMap<String, Arc<LogInner>>>,
}

impl InMemoryResultLog {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new(DEFAULT_MAX_LEN))
    }

    fn inner(&self, log_name: &str) -> Arc<LogInner> {
        let mut logs = self.logs.lock().unwrap();
        logs.entry(log_name.to_string())
            .or_insert_with(LogInner::new)
            .clone()
    }

    /// Oldest retained position, if the log is non-empty (test hook).
    pub fn oldest_position(&self, log_name: &str) -> Option<Position> {
        let inner = self.inner(log_name);
        let state = inner.state.lock().unwrap();
        state.entries.front().map(|e| e.position)
    }
}

impl Default for InMemoryResultLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

fn collect_after(state: &LogState, cursor: &LogCursor, max_count: usize) -> Vec<LogEntry> {
    let floor = match cursor {
        LogCursor::Beginning => None,
        LogCursor::After(p) => Some(*p),
    };
    state
        .entries
        .iter()
        .filter(|e| floor.is_none_or(|p| e.position > p))
        .take(max_count)
        .cloned()
        .collect()
}

#[async_trait]
impl ResultLog for InMemoryResultLog {
    async fn append(
        &self,
        log_name: &str,
        envelope: ResultEnvelope,
    ) -> Result<Position, LogError> {
        let inner = self.inner(log_name);
        let position = {
            let mut state = inner.state.lock().unwrap();
            state.next_seq += 1;
            let position = Position::new(state.next_seq, 0);
            state.entries.push_back(LogEntry { position, envelope });
            while state.entries.len() > self.max_len {
                state.entries.pop_front();
            }
            position
        };
        inner.appended.notify_waiters();
        Ok(position)
    }

    async fn read_after(
        &self,
        log_name: &str,
        cursor: &LogCursor,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner(log_name);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let state = inner.state.lock().unwrap();
                let batch = collect_after(&state, cursor, max_count);
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
            // An append between the check above and parking here is caught by
            // the next iteration after the bounded wait expires; the wait
            // never exceeds `timeout` either way.
            let notified = inner.appended.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

//! Per-connection relay: inbound submissions + outbound result delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use docrelay_core::{ClientId, JobId};

use crate::checkpoint::CheckpointStore;
use crate::dispatcher::{DispatchError, JobDescriptor, JobDispatcher};
use crate::log::{LogCursor, ResultLog};
use crate::protocol::{Delivery, Submission, SubmissionReply};

/// The peer is gone or the transport failed; the relay moves to `Closing`.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Write half of a relay connection. Shared by both loops (submission
/// acknowledgements and result deliveries travel over one socket), so
/// implementations serialize concurrent sends internally.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), ConnectionClosed>;
}

/// Read half of a relay connection.
#[async_trait]
pub trait MessageSource: Send {
    /// Next text frame. `Ok(None)` means the peer closed cleanly; `Err`
    /// means a transport fault. Either way the relay starts closing.
    async fn next_text(&mut self) -> Result<Option<String>, ConnectionClosed>;
}

/// Relay pacing and defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Max entries fetched per outbound poll.
    pub batch_size: usize,
    /// Bounded wait passed to `read_after`; also the worst-case shutdown
    /// latency of the outbound loop.
    pub block_timeout: Duration,
    /// Pacing sleep after an empty poll, for backends whose read returns
    /// immediately instead of waiting.
    pub poll_interval: Duration,
    /// Backoff after a transient log read failure.
    pub retry_backoff: Duration,
    /// Upper bound on one dispatcher submit; a queue that stalls past this
    /// is reported as unavailable so the inbound loop keeps serving.
    pub dispatch_timeout: Duration,
    /// Job type applied when a submission does not name one.
    pub default_job_type: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            retry_backoff: Duration::from_secs(1),
            dispatch_timeout: Duration::from_secs(5),
            default_job_type: "ocr".to_string(),
        }
    }
}

/// Connection lifecycle states. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Coordinator for one live connection.
///
/// While `Active`, two tasks run concurrently against the connection: an
/// inbound loop reading submission frames and driving the [`JobDispatcher`],
/// and an outbound loop polling the [`ResultLog`] from the client's
/// checkpoint and forwarding new entries in position order. A single watch
/// signal joins both loops for shutdown; cleanup runs exactly once even when
/// peer close and external cancellation race.
///
/// Running two simultaneous relays for the same client identity is
/// unsupported: both would race on one checkpoint key and could duplicate or
/// skip deliveries. Callers enforce single-active-connection-per-client.
pub struct StreamRelay {
    client: ClientId,
    log: Arc<dyn ResultLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn new(
        client: ClientId,
        log: Arc<dyn ResultLog>,
        checkpoints: Arc<dyn CheckpointStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            client,
            log,
            checkpoints,
            dispatcher,
            config,
        }
    }

    /// Drive the connection until the peer closes, the transport faults, or
    /// `external_shutdown` flips to `true`. Returns once cleanup finished.
    pub async fn run<S: MessageSource>(
        self,
        mut source: S,
        sink: Arc<dyn MessageSink>,
        mut external_shutdown: watch::Receiver<bool>,
    ) {
        let client = self.client.clone();
        debug!(client = %client, state = ?RelayState::Connecting, "relay connecting");

        let cursor = match self.checkpoints.get(&client).await {
            Ok(checkpoint) => LogCursor::from(checkpoint),
            Err(e) => {
                // Re-delivery from the log start is acceptable under
                // at-least-once; losing the connection over it is not.
                warn!(client = %client, error = %e, "checkpoint load failed, resuming from log start");
                LogCursor::Beginning
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let closing = Arc::new(AtomicBool::new(false));

        let outbound = tokio::spawn(outbound_loop(
            client.clone(),
            self.log.clone(),
            self.checkpoints.clone(),
            sink.clone(),
            cursor,
            self.config.clone(),
            shutdown_rx,
        ));

        info!(client = %client, state = ?RelayState::Active, "relay active");

        loop {
            tokio::select! {
                frame = source.next_text() => match frame {
                    Ok(Some(text)) => {
                        let reply = self.handle_submission(&text).await;
                        let json = match serde_json::to_string(&reply) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(client = %client, error = %e, "reply encode failed");
                                continue;
                            }
                        };
                        if sink.send_text(json).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(client = %client, "peer closed connection");
                        break;
                    }
                    Err(_) => {
                        debug!(client = %client, "connection transport fault");
                        break;
                    }
                },
                changed = external_shutdown.changed() => {
                    if changed.is_err() || *external_shutdown.borrow() {
                        debug!(client = %client, "external shutdown signal");
                        break;
                    }
                }
            }
        }

        // Idempotent: only the first closing trigger fires the signal.
        if !closing.swap(true, Ordering::SeqCst) {
            info!(client = %client, state = ?RelayState::Closing, "relay closing");
            let _ = shutdown_tx.send(true);
        }
        let _ = outbound.await;
        info!(client = %client, state = ?RelayState::Closed, "relay closed");
    }

    /// Handle one inbound frame. Malformed frames and dispatch failures yield
    /// a rejection reply; the connection stays open either way.
    async fn handle_submission(&self, text: &str) -> SubmissionReply {
        let submission: Submission = match serde_json::from_str(text) {
            Ok(submission) => submission,
            Err(e) => {
                debug!(client = %self.client, error = %e, "malformed submission frame");
                return SubmissionReply::rejected(
                    salvage_job_id(text),
                    format!("MalformedSubmission: {e}"),
                );
            }
        };

        let job_id = submission.job_id.clone();
        let job_type = submission
            .job_type
            .unwrap_or_else(|| self.config.default_job_type.clone());
        let descriptor =
            JobDescriptor::new(job_id.clone(), &self.client, job_type, submission.payload);

        let submit = self.dispatcher.submit(descriptor);
        match tokio::time::timeout(self.config.dispatch_timeout, submit).await {
            Ok(Ok(())) => {
                info!(client = %self.client, job_id = %job_id, "job submitted");
                SubmissionReply::submitted(job_id)
            }
            Ok(Err(e)) => {
                warn!(client = %self.client, job_id = %job_id, error = %e, "job dispatch failed");
                SubmissionReply::rejected(Some(job_id), e.code())
            }
            Err(_) => {
                warn!(client = %self.client, job_id = %job_id, "job dispatch timed out");
                SubmissionReply::rejected(
                    Some(job_id),
                    DispatchError::Unavailable("dispatch timed out".to_string()).code(),
                )
            }
        }
    }
}

/// Poll the log from `cursor`, forward entries in position order, advance the
/// checkpoint after each delivered entry. Exits on shutdown or when the
/// connection write fails; both are observed within one poll cycle.
async fn outbound_loop(
    client: ClientId,
    log: Arc<dyn ResultLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn MessageSink>,
    mut cursor: LogCursor,
    config: RelayConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let log_name = client.log_name();

    loop {
        let started = tokio::time::Instant::now();
        let read = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            read = log.read_after(&log_name, &cursor, config.batch_size, config.block_timeout) => read,
        };

        match read {
            Ok(entries) if entries.is_empty() => {
                // A backend with a native bounded wait already slept for
                // `block_timeout`; the pacing sleep is only for reads that
                // came back immediately.
                if started.elapsed() < config.block_timeout
                    && wait_or_shutdown(&mut shutdown, config.poll_interval).await
                {
                    break;
                }
            }
            Ok(entries) => {
                for entry in &entries {
                    let frame = match serde_json::to_string(&Delivery::from(entry)) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(client = %client, position = %entry.position, error = %e, "delivery encode failed, skipping entry");
                            cursor.advance(entry.position);
                            continue;
                        }
                    };
                    if sink.send_text(frame).await.is_err() {
                        debug!(client = %client, "outbound write failed, connection gone");
                        return;
                    }
                    cursor.advance(entry.position);
                    if let Err(e) = checkpoints.set(&client, entry.position).await {
                        // Non-fatal: delivery continues, re-delivery on the
                        // next connection is accepted (at-least-once).
                        warn!(client = %client, position = %entry.position, error = %e, "checkpoint write failed");
                    }
                }
            }
            Err(e) => {
                warn!(client = %client, error = %e, "result log read failed");
                if wait_or_shutdown(&mut shutdown, config.retry_backoff).await {
                    break;
                }
            }
        }
    }
}

/// Sleep for `wait`, returning early with `true` if shutdown fires.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Best-effort extraction of a job id from an otherwise malformed frame so
/// the rejection reply can still correlate.
fn salvage_job_id(text: &str) -> Option<JobId> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let raw = value.get("job_id")?.as_str()?;
    JobId::new(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{LogEntry, Position, ResultEnvelope};
    use crate::log::LogError;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl MessageSink for ChannelSink {
        async fn send_text(&self, text: String) -> Result<(), ConnectionClosed> {
            self.0.send(text).map_err(|_| ConnectionClosed)
        }
    }

    struct ChannelSource(mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl MessageSource for ChannelSource {
        async fn next_text(&mut self) -> Result<Option<String>, ConnectionClosed> {
            Ok(self.0.recv().await)
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        submitted: Mutex<Vec<JobDescriptor>>,
        unavailable: AtomicBool,
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn submit(&self, descriptor: JobDescriptor) -> Result<(), crate::DispatchError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(crate::DispatchError::Unavailable("queue down".into()));
            }
            self.submitted.lock().unwrap().push(descriptor);
            Ok(())
        }
    }

    /// Single-entry log stub: returns the entry once, then nothing.
    struct OneShotLog(Mutex<Option<LogEntry>>);

    #[async_trait]
    impl ResultLog for OneShotLog {
        async fn append(
            &self,
            _log_name: &str,
            _envelope: ResultEnvelope,
        ) -> Result<Position, LogError> {
            unimplemented!("not used by these tests")
        }

        async fn read_after(
            &self,
            _log_name: &str,
            cursor: &LogCursor,
            _max_count: usize,
            _timeout: Duration,
        ) -> Result<Vec<LogEntry>, LogError> {
            let entry = self.0.lock().unwrap().clone();
            match entry {
                Some(entry) if matches!(cursor, LogCursor::Beginning) => Ok(vec![entry]),
                _ => Ok(Vec::new()),
            }
        }
    }

    #[derive(Default)]
    struct MemCheckpoints(Mutex<Option<Position>>);

    #[async_trait]
    impl CheckpointStore for MemCheckpoints {
        async fn get(&self, _client: &ClientId) -> Result<Option<Position>, crate::CheckpointError> {
            Ok(*self.0.lock().unwrap())
        }

        async fn set(
            &self,
            _client: &ClientId,
            position: Position,
        ) -> Result<(), crate::CheckpointError> {
            *self.0.lock().unwrap() = Some(position);
            Ok(())
        }
    }

    /// Fails the first read with a transient error, then serves the entry.
    struct FlakyLog {
        fail_next: AtomicBool,
        entry: Mutex<Option<LogEntry>>,
    }

    #[async_trait]
    impl ResultLog for FlakyLog {
        async fn append(
            &self,
            _log_name: &str,
            _envelope: ResultEnvelope,
        ) -> Result<Position, LogError> {
            unimplemented!("not used by these tests")
        }

        async fn read_after(
            &self,
            _log_name: &str,
            cursor: &LogCursor,
            _max_count: usize,
            _timeout: Duration,
        ) -> Result<Vec<LogEntry>, LogError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(LogError::Transient("store unreachable".into()));
            }
            let entry = self.entry.lock().unwrap().clone();
            match entry {
                Some(entry) if matches!(cursor, LogCursor::Beginning) => Ok(vec![entry]),
                _ => Ok(Vec::new()),
            }
        }
    }

    /// Serves whatever was pushed, filtered by cursor.
    struct VecLog(Mutex<Vec<LogEntry>>);

    #[async_trait]
    impl ResultLog for VecLog {
        async fn append(
            &self,
            _log_name: &str,
            _envelope: ResultEnvelope,
        ) -> Result<Position, LogError> {
            unimplemented!("not used by these tests")
        }

        async fn read_after(
            &self,
            _log_name: &str,
            cursor: &LogCursor,
            max_count: usize,
            _timeout: Duration,
        ) -> Result<Vec<LogEntry>, LogError> {
            let floor = match cursor {
                LogCursor::Beginning => None,
                LogCursor::After(p) => Some(*p),
            };
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|e| floor.is_none_or(|p| e.position > p))
                .take(max_count)
                .cloned()
                .collect())
        }
    }

    /// Honors the bounded wait (sleeps the full timeout), always empty.
    #[derive(Default)]
    struct BlockingEmptyLog {
        reads: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ResultLog for BlockingEmptyLog {
        async fn append(
            &self,
            _log_name: &str,
            _envelope: ResultEnvelope,
        ) -> Result<Position, LogError> {
            unimplemented!("not used by these tests")
        }

        async fn read_after(
            &self,
            _log_name: &str,
            _cursor: &LogCursor,
            _max_count: usize,
            timeout: Duration,
        ) -> Result<Vec<LogEntry>, LogError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(timeout).await;
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FailingCheckpoints;

    #[async_trait]
    impl CheckpointStore for FailingCheckpoints {
        async fn get(&self, _client: &ClientId) -> Result<Option<Position>, crate::CheckpointError> {
            Ok(None)
        }

        async fn set(
            &self,
            _client: &ClientId,
            _position: Position,
        ) -> Result<(), crate::CheckpointError> {
            Err(crate::CheckpointError("checkpoint store down".to_string()))
        }
    }

    /// Never completes a submit; models a hung queue connection.
    struct StalledDispatcher;

    #[async_trait]
    impl JobDispatcher for StalledDispatcher {
        async fn submit(&self, _descriptor: JobDescriptor) -> Result<(), crate::DispatchError> {
            std::future::pending().await
        }
    }

    fn entry_at(major: u64, job: &str) -> LogEntry {
        LogEntry {
            position: Position::new(major, 0),
            envelope: ResultEnvelope::new(
                JobId::new(job).unwrap(),
                "ocr",
                serde_json::json!({ "n": major }),
            ),
        }
    }

    fn relay_parts() -> (
        StreamRelay,
        Arc<RecordingDispatcher>,
        Arc<MemCheckpoints>,
        Arc<OneShotLog>,
    ) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let checkpoints = Arc::new(MemCheckpoints::default());
        let log = Arc::new(OneShotLog(Mutex::new(None)));
        let config = RelayConfig {
            block_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(20),
            ..RelayConfig::default()
        };
        let relay = StreamRelay::new(
            ClientId::new("alice").unwrap(),
            log.clone(),
            checkpoints.clone(),
            dispatcher.clone(),
            config,
        );
        (relay, dispatcher, checkpoints, log)
    }

    // The sender must stay alive: a dropped watch sender reads as shutdown.
    fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("sink closed");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn submission_is_dispatched_and_acknowledged() {
        let (relay, dispatcher, _, _) = relay_parts();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        in_tx
            .send(r#"{"job_id":"j1","payload":"doc.pdf"}"#.to_string())
            .unwrap();

        let reply = next_frame(&mut out_rx).await;
        assert_eq!(reply["job_id"], "j1");
        assert_eq!(reply["status"], "submitted");

        let submitted = dispatcher.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].job_id.as_str(), "j1");
        assert_eq!(submitted[0].target_log, "results:alice");
        assert_eq!(submitted[0].job_type, "ocr");

        drop(in_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay did not close after peer disconnect")
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_rejected_connection_stays_open() {
        let (relay, dispatcher, _, _) = relay_parts();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        in_tx.send("not json".to_string()).unwrap();
        let reply = next_frame(&mut out_rx).await;
        assert_eq!(reply["status"], "error");
        assert!(reply["detail"]
            .as_str()
            .unwrap()
            .starts_with("MalformedSubmission"));

        // A valid frame afterwards still works.
        in_tx
            .send(r#"{"job_id":"j2","payload":{}}"#.to_string())
            .unwrap();
        let reply = next_frame(&mut out_rx).await;
        assert_eq!(reply["status"], "submitted");
        assert_eq!(dispatcher.submitted.lock().unwrap().len(), 1);

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_unavailable_reported_with_stable_code() {
        let (relay, dispatcher, _, _) = relay_parts();
        dispatcher.unavailable.store(true, Ordering::SeqCst);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        in_tx
            .send(r#"{"job_id":"j2","payload":"x"}"#.to_string())
            .unwrap();
        let reply = next_frame(&mut out_rx).await;
        assert_eq!(reply["job_id"], "j2");
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["detail"], "DispatchUnavailable");

        // Queue recovers; the same connection keeps serving.
        dispatcher.unavailable.store(false, Ordering::SeqCst);
        in_tx
            .send(r#"{"job_id":"j3","payload":"y"}"#.to_string())
            .unwrap();
        let reply = next_frame(&mut out_rx).await;
        assert_eq!(reply["status"], "submitted");

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn outbound_delivers_and_checkpoints() {
        let (relay, _, checkpoints, log) = relay_parts();
        let position = Position::new(1, 0);
        *log.0.lock().unwrap() = Some(LogEntry {
            position,
            envelope: ResultEnvelope::new(
                JobId::new("j1").unwrap(),
                "ocr",
                serde_json::json!({"text": "done"}),
            ),
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        let delivery = next_frame(&mut out_rx).await;
        assert_eq!(delivery["job_id"], "j1");
        assert_eq!(delivery["job_type"], "ocr");
        assert_eq!(delivery["result"]["text"], "done");

        // Checkpoint advanced past the delivered entry.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if *checkpoints.0.lock().unwrap() == Some(position) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("checkpoint was not advanced");

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn resumes_from_checkpoint_without_redelivery() {
        let (relay, _, checkpoints, log) = relay_parts();
        let position = Position::new(1, 0);
        checkpoints.set(&ClientId::new("alice").unwrap(), position).await.unwrap();
        *log.0.lock().unwrap() = Some(LogEntry {
            position,
            envelope: ResultEnvelope::new(JobId::new("j1").unwrap(), "ocr", serde_json::json!({})),
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        // Cursor starts after the checkpoint, so the already-delivered entry
        // must not be sent again.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(out_rx.try_recv().is_err());

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn external_shutdown_closes_both_loops() {
        let (relay, _, _, _) = relay_parts();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, ext_shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            ext_shutdown_rx,
        ));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay did not observe external shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn transient_log_read_error_backs_off_and_recovers() {
        let log = Arc::new(FlakyLog {
            fail_next: AtomicBool::new(true),
            entry: Mutex::new(Some(entry_at(1, "j1"))),
        });
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let relay = StreamRelay::new(
            ClientId::new("alice").unwrap(),
            log,
            Arc::new(MemCheckpoints::default()),
            dispatcher.clone(),
            RelayConfig {
                block_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                retry_backoff: Duration::from_millis(20),
                ..RelayConfig::default()
            },
        );

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        // The first read fails; the loop backs off and the retry delivers.
        let delivery = next_frame(&mut out_rx).await;
        assert_eq!(delivery["job_id"], "j1");

        // The degraded read never touched the inbound side.
        in_tx
            .send(r#"{"job_id":"j2","payload":"x"}"#.to_string())
            .unwrap();
        let reply = next_frame(&mut out_rx).await;
        assert_eq!(reply["status"], "submitted");

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_write_failure_does_not_stop_delivery() {
        let log = Arc::new(VecLog(Mutex::new(vec![entry_at(1, "j1"), entry_at(2, "j2")])));
        let relay = StreamRelay::new(
            ClientId::new("alice").unwrap(),
            log,
            Arc::new(FailingCheckpoints),
            Arc::new(RecordingDispatcher::default()),
            RelayConfig {
                block_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                ..RelayConfig::default()
            },
        );

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        // Every checkpoint write fails, yet both entries arrive in order.
        let first = next_frame(&mut out_rx).await;
        assert_eq!(first["job_id"], "j1");
        let second = next_frame(&mut out_rx).await;
        assert_eq!(second["job_id"], "j2");

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn empty_blocking_reads_skip_the_pacing_sleep() {
        let log = Arc::new(BlockingEmptyLog::default());
        let relay = StreamRelay::new(
            ClientId::new("alice").unwrap(),
            log.clone(),
            Arc::new(MemCheckpoints::default()),
            Arc::new(RecordingDispatcher::default()),
            RelayConfig {
                block_timeout: Duration::from_millis(20),
                // Long enough that any pacing sleep would freeze polling.
                poll_interval: Duration::from_secs(10),
                ..RelayConfig::default()
            },
        );

        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        // A backend that honors the bounded wait keeps getting polled
        // back-to-back instead of being parked on the fallback sleep.
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay did not observe external shutdown")
            .unwrap();
        assert!(log.reads.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn stalled_dispatch_times_out_as_unavailable() {
        let relay = StreamRelay::new(
            ClientId::new("alice").unwrap(),
            Arc::new(OneShotLog(Mutex::new(None))),
            Arc::new(MemCheckpoints::default()),
            Arc::new(StalledDispatcher),
            RelayConfig {
                block_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                dispatch_timeout: Duration::from_millis(50),
                ..RelayConfig::default()
            },
        );

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = idle_shutdown();
        let handle = tokio::spawn(relay.run(
            ChannelSource(in_rx),
            Arc::new(ChannelSink(out_tx)),
            shutdown_rx,
        ));

        in_tx
            .send(r#"{"job_id":"j1","payload":"x"}"#.to_string())
            .unwrap();
        let reply = next_frame(&mut out_rx).await;
        assert_eq!(reply["job_id"], "j1");
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["detail"], "DispatchUnavailable");

        drop(in_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay did not close after peer disconnect")
            .unwrap();
    }
}

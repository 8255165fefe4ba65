//! `docrelay-relay` — job dispatch and resumable result relay.
//!
//! The core subsystem: a per-connection [`StreamRelay`] runs an inbound loop
//! (submission frames -> [`JobDispatcher`]) and an outbound loop (bounded
//! polling of a [`ResultLog`] from the client's checkpoint -> connection)
//! concurrently over one connection's lifecycle. Storage policy stays behind
//! the trait seams; backends live in `docrelay-infra`.
//!
//! Delivery is at-least-once: the checkpoint is advanced after each delivered
//! entry, so a crash between delivery and checkpoint write re-delivers on the
//! next connection. The log is bounded, so a consumer that falls more than
//! the retention window behind silently resumes from the oldest retained
//! entry — a documented contract, not an accident.

pub mod checkpoint;
pub mod dispatcher;
pub mod envelope;
pub mod log;
pub mod protocol;
pub mod relay;

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use dispatcher::{DispatchError, JobDescriptor, JobDispatcher};
pub use envelope::{LogEntry, Position, ResultEnvelope};
pub use log::{LogCursor, LogError, ResultLog};
pub use protocol::{Delivery, Submission, SubmissionReply, SubmissionStatus};
pub use relay::{ConnectionClosed, MessageSink, MessageSource, RelayConfig, StreamRelay};

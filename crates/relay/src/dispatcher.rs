//! Job descriptors and the work-queue dispatch seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use async_trait::async_trait;

use docrelay_core::{ClientId, JobId};

/// A request to perform asynchronous domain work.
///
/// Identity is fixed by the caller up front so the submitter and the result
/// consumer can correlate without asking the queue backend. The descriptor is
/// consumed exactly once by a [`JobDispatcher`] and never mutated after
/// construction; `payload` is opaque to this core (typically a staged file
/// reference for the executor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: JobId,
    /// Result log the executor must append to, derived from the client.
    pub target_log: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(
        job_id: JobId,
        client: &ClientId,
        job_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            target_log: client.log_name(),
            job_type: job_type.into(),
            payload,
            submitted_at: Utc::now(),
        }
    }
}

/// Dispatch error taxonomy.
///
/// `Unavailable` means the job was never guaranteed to run; the submitter is
/// told so instead of this core retrying silently.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("work queue unreachable: {0}")]
    Unavailable(String),

    #[error("job descriptor could not be encoded: {0}")]
    Encode(String),
}

impl DispatchError {
    /// Stable machine-readable code carried on submission replies.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Unavailable(_) => "DispatchUnavailable",
            DispatchError::Encode(_) => "EncodeFailure",
        }
    }
}

/// Enqueues job descriptors on a distributed work queue for asynchronous
/// execution by an external executor pool.
///
/// `submit` returns once the enqueue is durably accepted by the queue; it
/// never waits for execution. Submitting the same job id twice forwards both
/// enqueues — deduplication, if wanted, belongs to the executor.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn submit(&self, descriptor: JobDescriptor) -> Result<(), DispatchError>;
}

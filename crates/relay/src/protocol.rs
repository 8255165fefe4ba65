//! Wire protocol for the bidirectional relay connection (JSON text frames).

use serde::{Deserialize, Serialize};

use docrelay_core::JobId;

use crate::envelope::LogEntry;

/// Inbound frame (client -> relay): submit one job.
///
/// `job_type` is optional on the wire; the relay fills the deployment
/// default when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: JobId,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
}

/// Acknowledgement status for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    Error,
}

/// Reply frame (relay -> client) for one submission, in request arrival
/// order. `job_id` is absent when the frame was too malformed to carry one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SubmissionReply {
    pub fn submitted(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            status: SubmissionStatus::Submitted,
            detail: None,
        }
    }

    pub fn rejected(job_id: Option<JobId>, detail: impl Into<String>) -> Self {
        Self {
            job_id,
            status: SubmissionStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

/// Outbound frame (relay -> client): one delivered result envelope, written
/// strictly in log position order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub job_id: JobId,
    pub result: serde_json::Value,
    pub job_type: String,
}

impl From<&LogEntry> for Delivery {
    fn from(entry: &LogEntry) -> Self {
        Self {
            job_id: entry.envelope.job_id().clone(),
            result: entry.envelope.result().clone(),
            job_type: entry.envelope.job_type().to_string(),
        }
    }
}

//! Result envelopes and their position in a log.

use serde::{Deserialize, Serialize};

use docrelay_core::JobId;

/// Position of an entry within one result log.
///
/// An opaque ordered token: two unsigned components compared
/// lexicographically, rendered as `"major-minor"`. This covers both the
/// in-memory log (a plain counter in `major`) and stream backends that
/// assign `"<millis>-<seq>"` ids. Positions within one log are strictly
/// increasing in append order; cross-log comparison is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Position {
    major: u64,
    minor: u64,
}

impl Position {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.major, self.minor)
    }
}

impl From<Position> for String {
    fn from(value: Position) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for Position {
    type Err = InvalidPosition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('-')
            .ok_or_else(|| InvalidPosition(s.to_string()))?;
        let major = major.parse().map_err(|_| InvalidPosition(s.to_string()))?;
        let minor = minor.parse().map_err(|_| InvalidPosition(s.to_string()))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for Position {
    type Error = InvalidPosition;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A position token that could not be parsed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid position token: {0}")]
pub struct InvalidPosition(pub String);

/// The output of executing one job, keyed by the originating job id.
///
/// Created by the job executor, immutable once appended, owned by the result
/// log until evicted by the retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    job_id: JobId,
    job_type: String,
    result: serde_json::Value,
}

impl ResultEnvelope {
    pub fn new(job_id: JobId, job_type: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            job_id,
            job_type: job_type.into(),
            result,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn result(&self) -> &serde_json::Value {
        &self.result
    }
}

/// A [`ResultEnvelope`] wrapped with its assigned log position.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub position: Position,
    pub envelope: ResultEnvelope,
}

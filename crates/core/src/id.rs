//! Strongly-typed identifiers used across the domain.
//!
//! Client and job identities arrive from callers as opaque strings (the
//! connection URL path and the submission frame respectively), so these are
//! validated string newtypes rather than generated UUIDs. `JobId::generate`
//! exists for callers that have no natural identity to supply.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identity of a connected client. Keys the client's result log and checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ClientId(String);

/// Caller-fixed identity of a submitted job, carried through dispatch and
/// back on the result envelope for correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct JobId(String);

macro_rules! impl_string_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Validate and wrap a caller-supplied identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, " must not be empty")));
                }
                if value.len() > 128 {
                    return Err(DomainError::invalid_id(concat!($name, " exceeds 128 bytes")));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        // Deserialization funnels through `new`, so ids arriving on the wire
        // carry the same guarantees as ids built in code.
        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_string_id!(ClientId, "ClientId");
impl_string_id!(JobId, "JobId");

impl ClientId {
    /// Name of this client's result log, derived deterministically so the
    /// submitter and the relay agree without coordination.
    pub fn log_name(&self) -> String {
        format!("results:{}", self.0)
    }
}

impl JobId {
    /// Generate a fresh id (UUIDv7, time-ordered) when the caller has none.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

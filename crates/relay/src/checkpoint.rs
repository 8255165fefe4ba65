//! Per-client checkpoint (last-delivered position) persistence.

use async_trait::async_trait;

use docrelay_core::ClientId;

use crate::envelope::Position;

/// Checkpoint store backend error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("checkpoint store failure: {0}")]
pub struct CheckpointError(pub String);

/// Durable mapping from client identity to last-delivered log position.
///
/// Written only by the outbound loop of a client's single active relay;
/// read once at connection start; never deleted. Writes are fire-and-forget
/// from the relay's perspective: a failed write is logged and delivery
/// continues, accepting re-delivery on the next connection (at-least-once).
/// There is deliberately no transactional coupling to log delivery.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last-delivered position for this client, if one was ever recorded.
    async fn get(&self, client: &ClientId) -> Result<Option<Position>, CheckpointError>;

    /// Record a newly delivered position. Durable before returning.
    async fn set(&self, client: &ClientId, position: Position) -> Result<(), CheckpointError>;
}

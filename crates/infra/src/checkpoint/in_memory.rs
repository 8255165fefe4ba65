//! In-memory checkpoint store for dev/tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docrelay_core::ClientId;
use docrelay_relay::{CheckpointError, CheckpointStore, Position};

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    positions: Mutex<HashMap<ClientId, Position>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, client: &ClientId) -> Result<Option<Position>, CheckpointError> {
        Ok(self.positions.lock().unwrap().get(client).copied())
    }

    async fn set(&self, client: &ClientId, position: Position) -> Result<(), CheckpointError> {
        self.positions
            .lock()
            .unwrap()
            .insert(client.clone(), position);
        Ok(())
    }
}

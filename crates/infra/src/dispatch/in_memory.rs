//! In-memory dispatcher for dev/tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docrelay_relay::{DispatchError, JobDescriptor, JobDispatcher};

/// Records submitted descriptors instead of enqueueing them anywhere.
///
/// `set_unavailable` simulates an unreachable queue for failure-path tests.
#[derive(Debug, Default)]
pub struct InMemoryDispatcher {
    submitted: Mutex<Vec<JobDescriptor>>,
    unavailable: AtomicBool,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<JobDescriptor> {
        self.submitted.lock().unwrap().clone()
    }

    /// Remove and return everything submitted so far (executor-side view).
    pub fn drain(&self) -> Vec<JobDescriptor> {
        std::mem::take(&mut *self.submitted.lock().unwrap())
    }
}

#[async_trait]
impl JobDispatcher for InMemoryDispatcher {
    async fn submit(&self, descriptor: JobDescriptor) -> Result<(), DispatchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DispatchError::Unavailable(
                "in-memory queue marked unavailable".to_string(),
            ));
        }
        self.submitted.lock().unwrap().push(descriptor);
        Ok(())
    }
}

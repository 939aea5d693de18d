//! Cluster-wide bound on in-flight lifecycle operations.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{LifecycleError, Result};

/// The default number of lifecycle operations allowed to talk to the
/// hypervisor at once.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// A shared pool of operation slots.
///
/// Clones share the same pool. A lifecycle task holds one [`GatePermit`]
/// for as long as it issues hypervisor calls; dropping the permit returns
/// the slot, whichever way the task ends.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One held slot. Released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate with `max_parallel` slots (at least one).
    pub fn new(max_parallel: usize) -> Self {
        let capacity = max_parallel.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LifecycleError::GateClosed)?;
        debug!(available = self.available(), capacity = self.capacity, "Acquired operation slot");
        Ok(GatePermit { _permit: permit })
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse all further acquisitions. Held permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARALLEL)
    }
}

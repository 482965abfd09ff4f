//! Admission gate for device creation calls.
//!
//! Creation requests are the expensive operation on the backend; a burst of
//! concurrent orchestrations must not translate into an unbounded burst of
//! creation calls. The gate is a weighted semaphore sized at provider
//! configuration time. Permits are RAII guards, so a slot is returned on
//! every exit path of the guarded operation, including panics.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;

/// Bounds how many device creation calls may be in flight at once.
#[derive(Debug, Clone)]
pub struct CreateGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl CreateGate {
    /// Create a gate with the given capacity. A capacity below 1 is clamped
    /// to 1; a zero-capacity gate could never admit anything.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a creation slot.
    ///
    /// Blocks until a slot frees up or the cancellation signal fires. On
    /// cancellation no slot is held.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] when the token fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, Error> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                // The semaphore is never closed.
                let permit = permit.map_err(|_| Error::Cancelled)?;
                debug!(available = self.permits.available_permits(), "creation slot acquired");
                Ok(permit)
            }
        }
    }

    /// Configured capacity of the gate.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

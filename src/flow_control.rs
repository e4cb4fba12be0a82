//! Admission control for unacknowledged deliveries.
//!
//! The budget caps how many deliveries, and how many payload bytes, may be
//! received but not yet acknowledged. The dispatch loop acquires a
//! [`FlowPermit`] before dispatching each delivery; the permit is returned
//! when the delivery is acknowledged (or dropped).

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Shared unacknowledged-message budget.
#[derive(Debug, Clone)]
pub struct FlowControl {
    messages: Arc<Semaphore>,
    bytes: Arc<Semaphore>,
    max_messages: usize,
    max_bytes: usize,
}

/// Proof of admission for one delivery. Dropping it releases the budget.
#[derive(Debug)]
pub struct FlowPermit {
    _message: OwnedSemaphorePermit,
    _bytes: Option<OwnedSemaphorePermit>,
    size: usize,
}

impl FlowPermit {
    pub fn size(&self) -> usize {
        self.size
    }
}

impl FlowControl {
    pub fn new(max_messages: usize, max_bytes: usize) -> Self {
        let max_messages = max_messages.max(1);
        let max_bytes = max_bytes.clamp(1, u32::MAX as usize);
        Self {
            messages: Arc::new(Semaphore::new(max_messages)),
            bytes: Arc::new(Semaphore::new(max_bytes)),
            max_messages,
            max_bytes,
        }
    }

    /// Deliveries currently holding a permit.
    pub fn in_flight_messages(&self) -> usize {
        self.max_messages - self.messages.available_permits()
    }

    /// Payload bytes currently held by permits.
    pub fn in_flight_bytes(&self) -> usize {
        self.max_bytes - self.bytes.available_permits()
    }

    /// Wait until a delivery of `size` bytes fits in the budget.
    ///
    /// A delivery larger than the whole byte budget is admitted once every
    /// other byte has been released.
    pub async fn acquire(&self, size: usize) -> Result<FlowPermit, AcquireError> {
        let message = self.messages.clone().acquire_owned().await?;
        let requested = size.min(self.max_bytes);
        let bytes = if requested == 0 {
            None
        } else {
            // bounded by max_bytes, which fits in u32
            Some(self.bytes.clone().acquire_many_owned(requested as u32).await?)
        };

        Ok(FlowPermit {
            _message: message,
            _bytes: bytes,
            size,
        })
    }

    /// Admit without waiting; `None` when the budget is exhausted.
    pub fn try_acquire(&self, size: usize) -> Option<FlowPermit> {
        let message = self.messages.clone().try_acquire_owned().ok()?;
        let requested = size.min(self.max_bytes);
        let bytes = if requested == 0 {
            None
        } else {
            Some(self.bytes.clone().try_acquire_many_owned(requested as u32).ok()?)
        };

        Some(FlowPermit {
            _message: message,
            _bytes: bytes,
            size,
        })
    }

    /// Stop admitting; pending and future acquisitions fail. Permits already
    /// held are unaffected.
    pub fn close(&self) {
        self.messages.close();
        self.bytes.close();
    }
}

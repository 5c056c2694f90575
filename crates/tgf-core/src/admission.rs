//! Bounded admission for fetch/download/upload work.
//!
//! Every admitted request holds an [`AdmissionSlot`] until it finishes. The slot
//! wraps an owned semaphore permit, so it is returned exactly once on any exit
//! path: explicit [`AdmissionSlot::release`], early return, error, or the task
//! being dropped.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionMode {
    /// Wait for a free slot.
    Queue,
    /// Return [`Busy`] immediately when saturated.
    FailFast,
}

impl AdmissionMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "queue" | "wait" => Some(Self::Queue),
            "fail_fast" | "failfast" | "reject" => Some(Self::FailFast),
            _ => None,
        }
    }
}

/// The admission ceiling is reached (fail-fast mode only).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Busy;

#[derive(Clone, Debug)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    capacity: usize,
    mode: AdmissionMode,
}

impl AdmissionController {
    pub fn new(capacity: usize, mode: AdmissionMode) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            mode,
        }
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.permits.available_permits())
    }

    /// True when an acquire right now would not get a slot immediately.
    pub fn is_saturated(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Acquire a slot according to the configured mode.
    ///
    /// Only the calling task waits in queue mode; other requests keep running.
    pub async fn acquire(&self) -> Result<AdmissionSlot, Busy> {
        match self.mode {
            AdmissionMode::FailFast => self.try_acquire(),
            AdmissionMode::Queue => {
                // The semaphore is never closed, so this only fails if that changes.
                let permit = self.permits.clone().acquire_owned().await.map_err(|_| Busy)?;
                Ok(AdmissionSlot { _permit: permit })
            }
        }
    }

    /// Acquire without waiting, regardless of mode.
    pub fn try_acquire(&self) -> Result<AdmissionSlot, Busy> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(AdmissionSlot { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => Err(Busy),
        }
    }
}

/// One unit of admitted capacity. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionSlot {
    pub fn release(self) {
        drop(self);
    }
}

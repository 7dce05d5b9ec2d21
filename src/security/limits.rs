//! Outbound fetch limits.
//!
//! # Responsibilities
//! - Cap the number of simultaneous upstream fetches
//! - Report how many fetch slots remain
//! - Resize in place on reload so in-flight fetches stay counted
//!
//! # Design Decisions
//! - Callers wait for a slot rather than being rejected; the request
//!   deadline still applies while waiting
//! - The permit is held for the whole fetch including body download

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded pool of outbound fetch slots. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct FetchLimiter {
    slots: Arc<Semaphore>,
    max_concurrent: Arc<AtomicUsize>,
}

impl FetchLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent: Arc::new(AtomicUsize::new(max_concurrent)),
        }
    }

    /// Change the slot count, keeping permits held by running fetches.
    ///
    /// Shrinking retires slots as they come free; must run inside a Tokio
    /// runtime when fetches are in flight.
    pub fn resize(&self, max_concurrent: usize) {
        let previous = self.max_concurrent.swap(max_concurrent, Ordering::SeqCst);
        if max_concurrent > previous {
            self.slots.add_permits(max_concurrent - previous);
            return;
        }

        let excess = previous - max_concurrent;
        if excess == 0 {
            return;
        }
        let Ok(excess) = u32::try_from(excess) else {
            return;
        };
        match self.slots.clone().try_acquire_many_owned(excess) {
            Ok(permits) => permits.forget(),
            Err(_) => {
                let slots = self.slots.clone();
                tokio::spawn(async move {
                    if let Ok(permits) = slots.acquire_many_owned(excess).await {
                        permits.forget();
                    }
                });
            }
        }
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> FetchPermit {
        let available = self.slots.available_permits();
        if available == 0 {
            tracing::debug!(max_concurrent = self.max_concurrent(), "Fetch limit reached, waiting for a slot");
        }

        // Never closed, so acquisition cannot fail.
        let permit = self.slots.clone().acquire_owned().await.ok();
        FetchPermit { _permit: permit }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

/// A held fetch slot.
#[derive(Debug)]
pub struct FetchPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

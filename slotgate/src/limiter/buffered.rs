//! Limiter backed by a bounded channel.
//!
//! Borrowing deposits a token into the channel; settling up drains one. The
//! channel's bound is the only thing that enforces capacity. The `active`
//! counter trails the channel and exists for observation.

use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::Limiter;
use crate::error::{LimiterError, Result};

/// Limiter with no ordering guarantee among blocked callers.
///
/// Whichever blocked `borrow` the runtime wakes first after a release wins
/// the freed slot.
pub struct BufferedLimiter {
    slots_tx: mpsc::Sender<()>,
    slots_rx: StdMutex<mpsc::Receiver<()>>,
    capacity: usize,
    active: AtomicUsize,
}

impl BufferedLimiter {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(LimiterError::ZeroCapacity);
        }

        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            slots_tx: tx,
            slots_rx: StdMutex::new(rx),
            capacity,
            active: AtomicUsize::new(0),
        })
    }

    fn deposited(&self, permit: mpsc::Permit<'_, ()>) -> bool {
        permit.send(());
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(active, capacity = self.capacity, "Slot borrowed");
        true
    }
}

#[async_trait]
impl Limiter for BufferedLimiter {
    async fn borrow(&self, cancel: &CancellationToken) -> bool {
        // A free slot is granted even if `cancel` already fired.
        match self.slots_tx.try_reserve() {
            Ok(permit) => return self.deposited(permit),
            Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                tracing::error!("Slot buffer closed - refusing borrow");
                return false;
            }
        }

        tracing::trace!(capacity = self.capacity, "Buffer full, waiting for a slot");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Borrow cancelled while waiting for a slot");
                false
            }
            reserved = self.slots_tx.reserve() => match reserved {
                Ok(permit) => self.deposited(permit),
                Err(_) => {
                    tracing::error!("Slot buffer closed while waiting");
                    false
                }
            },
        }
    }

    fn settle_up(&self) {
        // Decrement first so `active` never exceeds the tokens in the buffer.
        let released = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if !released {
            tracing::debug!("settle_up called with no slot held - ignoring");
            return;
        }

        let mut rx = self.slots_rx.lock().unwrap_or_else(PoisonError::into_inner);
        if rx.try_recv().is_err() {
            tracing::error!("Slot buffer empty while a slot was accounted as held");
        }
    }

    fn is_available(&self) -> bool {
        self.active.load(Ordering::Relaxed) < self.capacity
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

//! Limiter with an atomic fast path and a FIFO queue of parked waiters.
//!
//! Ordering discipline between the counter and the queue:
//! - `users` is incremented only by a compare-and-swap bounded by capacity,
//!   either lock-free on the fast path or under the queue lock on the slow
//!   path.
//! - `users` is decremented only under the queue lock, and only when no
//!   waiter is queued.
//! - A waiter is enqueued only after it has observed, under the lock, that
//!   `users == capacity`. A release therefore either lands before the
//!   enqueue (and the re-check succeeds) or after it (and hands the slot to
//!   the queue head). No wakeup is lost.
//! - A hand-off leaves `users` unchanged; the slot changes holder without
//!   ever being observed as free.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::Limiter;
use crate::error::{LimiterError, Result};

type WaiterId = u64;

struct Waiter {
    id: WaiterId,
    notify: oneshot::Sender<()>,
}

/// Limiter that grants contended slots in arrival order.
///
/// Callers arriving while a slot is free take it without touching the queue,
/// which can let them overtake already-parked waiters.
pub struct QueuedLimiter {
    capacity: usize,
    users: AtomicUsize,
    waiters: StdMutex<VecDeque<Waiter>>,
    next_waiter: AtomicU64,
}

impl QueuedLimiter {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(LimiterError::ZeroCapacity);
        }

        Ok(Self {
            capacity,
            users: AtomicUsize::new(0),
            waiters: StdMutex::new(VecDeque::new()),
            next_waiter: AtomicU64::new(0),
        })
    }

    /// Number of callers parked in the queue.
    pub fn queued(&self) -> usize {
        self.lock_waiters().len()
    }

    fn lock_waiters(&self) -> MutexGuard<'_, VecDeque<Waiter>> {
        // Critical sections never panic, so a poisoned queue is still consistent.
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_take_free(&self) -> bool {
        self.users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn admit(&self) -> Admission<'_> {
        if self.try_take_free() {
            return Admission::Granted;
        }

        let mut waiters = self.lock_waiters();
        // A release may have landed between the fast path and the lock.
        if self.try_take_free() {
            return Admission::Granted;
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        waiters.push_back(Waiter { id, notify: tx });
        tracing::trace!(waiter = id, queued = waiters.len(), "Waiting for a slot");

        Admission::Parked(PendingBorrow {
            limiter: self,
            id,
            granted: rx,
            settled: false,
        })
    }

    /// Give one held slot back: to the queue head if anyone is parked,
    /// otherwise to the counter. Must be called with the queue locked.
    fn release_locked(&self, waiters: &mut VecDeque<Waiter>) {
        while let Some(waiter) = waiters.pop_front() {
            if waiter.notify.send(()).is_ok() {
                tracing::trace!(waiter = waiter.id, "Slot handed off to waiter");
                return;
            }
            // Receiver vanished without withdrawing; skip it.
            tracing::debug!(waiter = waiter.id, "Discarding abandoned waiter");
        }

        if self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            tracing::debug!("settle_up called with no slot held - ignoring");
        }
    }
}

enum Admission<'a> {
    Granted,
    Parked(PendingBorrow<'a>),
}

/// A parked `borrow`. Withdraws itself from the queue when dropped before
/// the outcome is settled, returning any grant that raced the drop.
struct PendingBorrow<'a> {
    limiter: &'a QueuedLimiter,
    id: WaiterId,
    granted: oneshot::Receiver<()>,
    settled: bool,
}

impl PendingBorrow<'_> {
    /// Leave the queue after cancellation. Returns `true` if a releaser had
    /// already handed this waiter a slot, which the caller now holds.
    fn withdraw(&mut self) -> bool {
        self.settled = true;
        let mut waiters = self.limiter.lock_waiters();

        if let Some(pos) = waiters.iter().position(|w| w.id == self.id) {
            waiters.remove(pos);
            return false;
        }

        // Not queued: a releaser popped us, and it fires the handle before
        // letting go of the lock.
        match self.granted.try_recv() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(waiter = self.id, error = %e, "Waiter dequeued without a grant");
                false
            }
        }
    }
}

impl Drop for PendingBorrow<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.withdraw() {
            tracing::debug!(waiter = self.id, "Borrow dropped after grant - releasing slot");
            let mut waiters = self.limiter.lock_waiters();
            self.limiter.release_locked(&mut waiters);
        }
    }
}

#[async_trait]
impl Limiter for QueuedLimiter {
    async fn borrow(&self, cancel: &CancellationToken) -> bool {
        let mut pending = match self.admit() {
            Admission::Granted => return true,
            Admission::Parked(pending) => pending,
        };

        tokio::select! {
            biased;
            granted = &mut pending.granted => {
                pending.settled = true;
                granted.is_ok()
            }
            _ = cancel.cancelled() => {
                let granted = pending.withdraw();
                if granted {
                    tracing::debug!(waiter = pending.id, "Grant won the race against cancellation");
                } else {
                    tracing::debug!(waiter = pending.id, "Borrow cancelled while queued");
                }
                granted
            }
        }
    }

    fn settle_up(&self) {
        let mut waiters = self.lock_waiters();
        self.release_locked(&mut waiters);
    }

    fn is_available(&self) -> bool {
        self.users.load(Ordering::Relaxed) < self.capacity
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn active(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    fn waiting(&self) -> Option<usize> {
        Some(self.queued())
    }
}

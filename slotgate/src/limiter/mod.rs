//! Bounded-concurrency limiters.
//!
//! Two strategies implement the same [`Limiter`] contract:
//! - [`BufferedLimiter`]: a bounded channel is the single arbiter of capacity.
//!   Blocked callers race for freed slots in no particular order.
//! - [`QueuedLimiter`]: an atomic counter serves the uncontended case, and a
//!   locked FIFO queue of waiters hands released slots directly to the oldest
//!   waiter.
//!
//! A successful [`Limiter::borrow`] must be paired with exactly one
//! [`Limiter::settle_up`]. Prefer the guards in [`crate::slot`], which release
//! on every exit path.

mod buffered;
mod queued;
mod traced;

#[cfg(test)]
pub(crate) mod contract;

pub use buffered::BufferedLimiter;
pub use queued::QueuedLimiter;
pub use traced::Traced;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A pool of interchangeable slots shared by concurrent callers.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Acquire one slot, waiting until one frees up or `cancel` fires.
    ///
    /// Returns `true` iff a slot was granted. A `false` return leaves the
    /// limiter's accounting untouched.
    async fn borrow(&self, cancel: &CancellationToken) -> bool;

    /// Release one previously borrowed slot.
    ///
    /// Never blocks. Calling it with no slot held is a no-op.
    fn settle_up(&self);

    /// Advisory probe: `true` if a slot looked free at the time of the call.
    ///
    /// The answer may be stale by the time the caller acts on it; never gate
    /// work on it without going through [`Limiter::borrow`].
    fn is_available(&self) -> bool;

    /// Maximum number of concurrently held slots.
    fn capacity(&self) -> usize;

    /// Number of slots currently held.
    fn active(&self) -> usize;

    /// Number of callers parked waiting for a slot, if the strategy tracks it.
    fn waiting(&self) -> Option<usize> {
        None
    }

    fn stats(&self) -> LimiterStats {
        LimiterStats {
            capacity: self.capacity(),
            active: self.active(),
            waiting: self.waiting(),
        }
    }
}

/// Point-in-time snapshot of a limiter's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub capacity: usize,
    pub active: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<usize>,
}

impl LimiterStats {
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.active)
    }

    /// All slots held.
    pub fn is_saturated(&self) -> bool {
        self.active >= self.capacity
    }
}

//! Scoped slot guards.
//!
//! A guard stands for one successful borrow and settles it up exactly once
//! when dropped: on normal return, early return, cancellation or panic.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::limiter::Limiter;

/// Borrow a slot, returning a guard that releases it on drop.
///
/// `None` means `cancel` fired before a slot was granted.
pub async fn acquire<'a, L>(limiter: &'a L, cancel: &CancellationToken) -> Option<Slot<'a, L>>
where
    L: Limiter + ?Sized,
{
    limiter.borrow(cancel).await.then(|| Slot { limiter })
}

/// Like [`acquire`], for guards that must outlive the caller's stack frame
/// (e.g. moved into a spawned task).
pub async fn acquire_owned(
    limiter: Arc<dyn Limiter>,
    cancel: &CancellationToken,
) -> Option<OwnedSlot> {
    if limiter.borrow(cancel).await {
        Some(OwnedSlot {
            limiter: Some(limiter),
        })
    } else {
        None
    }
}

/// A held slot borrowed from `L`.
#[must_use = "dropping the slot releases it immediately"]
pub struct Slot<'a, L: Limiter + ?Sized> {
    limiter: &'a L,
}

impl<L: Limiter + ?Sized> Slot<'_, L> {
    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl<L: Limiter + ?Sized> Drop for Slot<'_, L> {
    fn drop(&mut self) {
        self.limiter.settle_up();
    }
}

/// A held slot that keeps its limiter alive.
#[must_use = "dropping the slot releases it immediately"]
pub struct OwnedSlot {
    limiter: Option<Arc<dyn Limiter>>,
}

impl OwnedSlot {
    pub fn limiter(&self) -> Option<&Arc<dyn Limiter>> {
        self.limiter.as_ref()
    }

    /// Release the slot now.
    pub fn release(mut self) {
        self.settle();
    }

    fn settle(&mut self) {
        if let Some(limiter) = self.limiter.take() {
            limiter.settle_up();
        }
    }
}

impl Drop for OwnedSlot {
    fn drop(&mut self) {
        self.settle();
    }
}

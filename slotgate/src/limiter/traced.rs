//! Diagnostic decorator that logs every borrow with a unique id.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Limiter;

/// Wraps a limiter and emits a `debug` event per borrow.
///
/// Semantics are those of the inner limiter; only logging is added.
pub struct Traced<L> {
    inner: L,
    name: String,
}

impl<L: Limiter> Traced<L> {
    pub fn new(name: impl Into<String>, inner: L) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

#[async_trait]
impl<L: Limiter> Limiter for Traced<L> {
    async fn borrow(&self, cancel: &CancellationToken) -> bool {
        let borrow_id = Uuid::new_v4();
        let requested_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let start = Instant::now();

        let granted = self.inner.borrow(cancel).await;

        tracing::debug!(
            limiter = %self.name,
            %borrow_id,
            %requested_at,
            granted,
            waited = ?start.elapsed(),
            active = self.inner.active(),
            capacity = self.inner.capacity(),
            "Borrow finished"
        );
        granted
    }

    fn settle_up(&self) {
        self.inner.settle_up();
        tracing::trace!(
            limiter = %self.name,
            active = self.inner.active(),
            "Slot settled"
        );
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn active(&self) -> usize {
        self.inner.active()
    }

    fn waiting(&self) -> Option<usize> {
        self.inner.waiting()
    }
}

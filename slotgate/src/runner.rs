//! Runs units of work under a shared limiter.
//!
//! The runner owns the root shutdown token. Every unit borrows a slot under
//! that token, is recorded in the in-flight registry while it runs, and
//! releases its slot through a guard so panics and early returns cannot leak
//! capacity.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::KeyedCache;
use crate::limiter::{Limiter, LimiterStats};
use crate::slot::acquire_owned;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("cancelled before a slot was granted")]
    Cancelled,
    #[error("runner is shutting down")]
    Shutdown,
}

/// A unit of work currently holding a slot.
#[derive(Debug, Clone, Serialize)]
pub struct WorkUnit {
    pub id: Uuid,
    pub label: String,
    pub started_at: DateTime<Utc>,
}

pub struct Runner {
    limiter: Arc<dyn Limiter>,
    shutdown: CancellationToken,
    in_flight: KeyedCache<Uuid, WorkUnit>,
}

/// Removes a unit from the registry however its future ends.
struct Registration<'a> {
    runner: &'a Runner,
    id: Uuid,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.runner.in_flight.delete(&self.id);
    }
}

impl Runner {
    pub fn new(limiter: Arc<dyn Limiter>) -> Arc<Self> {
        Arc::new(Self {
            limiter,
            shutdown: CancellationToken::new(),
            in_flight: KeyedCache::new(),
        })
    }

    pub fn limiter(&self) -> &Arc<dyn Limiter> {
        &self.limiter
    }

    pub fn stats(&self) -> LimiterStats {
        self.limiter.stats()
    }

    /// Root token; cancelling it stops every pending borrow.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(in_flight = self.in_flight.len(), "Runner shutting down");
        }
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Units currently holding a slot.
    pub fn in_flight(&self) -> Vec<WorkUnit> {
        self.in_flight
            .values()
            .into_iter()
            .map(|unit| unit.as_ref().clone())
            .collect()
    }

    /// Wait for a slot, then run `work` while holding it.
    pub async fn run<F, T>(&self, label: impl Into<String>, work: F) -> Result<T, RunError>
    where
        F: Future<Output = T>,
    {
        self.run_with_cancel(label, &CancellationToken::new(), work)
            .await
    }

    /// Like [`Runner::run`], also giving up the wait when `cancel` fires.
    ///
    /// Cancellation only affects the wait for a slot; once granted, `work`
    /// runs to completion.
    pub async fn run_with_cancel<F, T>(
        &self,
        label: impl Into<String>,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, RunError>
    where
        F: Future<Output = T>,
    {
        let label = label.into();
        if self.shutdown.is_cancelled() {
            tracing::debug!(label = %label, "Work not started: shutting down");
            return Err(RunError::Shutdown);
        }

        // Dropping a pending borrow withdraws it, so racing the caller's
        // token here cannot leak a slot.
        let slot = tokio::select! {
            biased;
            slot = acquire_owned(Arc::clone(&self.limiter), &self.shutdown) => slot,
            _ = cancel.cancelled() => None,
        };

        let Some(_slot) = slot else {
            return if self.shutdown.is_cancelled() {
                tracing::debug!(label = %label, "Work not started: shutting down");
                Err(RunError::Shutdown)
            } else {
                tracing::debug!(label = %label, "Work not started: cancelled while waiting");
                Err(RunError::Cancelled)
            };
        };

        let id = Uuid::new_v4();
        self.in_flight.store(
            id,
            WorkUnit {
                id,
                label: label.clone(),
                started_at: Utc::now(),
            },
        );
        let _registration = Registration { runner: self, id };
        tracing::debug!(label = %label, work_id = %id, "Work started");

        let output = work.await;
        tracing::debug!(label = %label, work_id = %id, "Work finished");
        Ok(output)
    }

    /// Run `work` on a new task once a slot is available.
    pub fn spawn<F, T>(
        self: &Arc<Self>,
        label: impl Into<String>,
        work: F,
    ) -> JoinHandle<Result<T, RunError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let runner = Arc::clone(self);
        let label = label.into();
        tokio::spawn(async move { runner.run(label, work).await })
    }
}

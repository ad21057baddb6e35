//! slotgate: bounded-concurrency admission with cancellable waits.

pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod runner;
pub mod signal;
pub mod slot;
pub mod telemetry;

pub use cache::KeyedCache;
pub use config::{LimiterConfig, Strategy};
pub use error::{LimiterError, Result};
pub use limiter::{BufferedLimiter, Limiter, LimiterStats, QueuedLimiter, Traced};
pub use runner::{RunError, Runner, WorkUnit};
pub use slot::{OwnedSlot, Slot, acquire, acquire_owned};
pub use tokio_util::sync::CancellationToken;

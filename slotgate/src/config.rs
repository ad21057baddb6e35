//! Limiter configuration.
//!
//! Loaded from JSON or from `SLOTGATE_*` environment variables. Unparsable
//! environment values fall back to defaults with a warning rather than
//! aborting startup.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};
use crate::limiter::{BufferedLimiter, Limiter, QueuedLimiter, Traced};

pub const ENV_CAPACITY: &str = "SLOTGATE_CAPACITY";
pub const ENV_STRATEGY: &str = "SLOTGATE_STRATEGY";
pub const ENV_TRACE_BORROWS: &str = "SLOTGATE_TRACE_BORROWS";

/// Which limiter implementation to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Bounded channel, no ordering among waiters.
    Buffered,
    /// Atomic fast path plus FIFO waiter queue.
    #[default]
    Queued,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Queued => "queued",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(Self::Buffered),
            "queued" => Ok(Self::Queued),
            other => Err(LimiterError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum number of concurrently held slots.
    pub capacity: usize,
    pub strategy: Strategy,
    /// Wrap the limiter in [`Traced`] to log each borrow.
    pub trace_borrows: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            strategy: Strategy::default(),
            trace_borrows: false,
        }
    }
}

impl LimiterConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_trace_borrows(mut self, trace: bool) -> Self {
        self.trace_borrows = trace;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `SLOTGATE_*` variables, keeping defaults for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.capacity = capacity,
                _ => tracing::warn!(
                    value = %raw,
                    default = config.capacity,
                    "Invalid {ENV_CAPACITY}, using default"
                ),
            }
        }

        if let Some(raw) = lookup(ENV_STRATEGY) {
            match raw.parse::<Strategy>() {
                Ok(strategy) => config.strategy = strategy,
                Err(e) => tracing::warn!(
                    error = %e,
                    default = %config.strategy,
                    "Invalid {ENV_STRATEGY}, using default"
                ),
            }
        }

        if let Some(raw) = lookup(ENV_TRACE_BORROWS) {
            config.trace_borrows = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(LimiterError::ZeroCapacity);
        }
        Ok(())
    }

    /// Construct the configured limiter.
    pub fn build(&self) -> Result<Arc<dyn Limiter>> {
        self.validate()?;

        let limiter: Arc<dyn Limiter> = match (self.strategy, self.trace_borrows) {
            (Strategy::Buffered, false) => Arc::new(BufferedLimiter::new(self.capacity)?),
            (Strategy::Queued, false) => Arc::new(QueuedLimiter::new(self.capacity)?),
            (Strategy::Buffered, true) => Arc::new(Traced::new(
                Strategy::Buffered.as_str(),
                BufferedLimiter::new(self.capacity)?,
            )),
            (Strategy::Queued, true) => Arc::new(Traced::new(
                Strategy::Queued.as_str(),
                QueuedLimiter::new(self.capacity)?,
            )),
        };

        tracing::debug!(
            capacity = self.capacity,
            strategy = %self.strategy,
            trace_borrows = self.trace_borrows,
            "Limiter built"
        );
        Ok(limiter)
    }
}

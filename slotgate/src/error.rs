use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("limiter capacity must be greater than zero")]
    ZeroCapacity,

    #[error("unknown limiter strategy '{0}' (expected 'buffered' or 'queued')")]
    UnknownStrategy(String),

    #[error("failed to parse limiter config: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LimiterError>;

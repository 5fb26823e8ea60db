//! Registry error types.

use reel_models::JobStatus;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Row already exists: {0}")]
    AlreadyExists(String),

    #[error("Transition rejected for job {job_id}: {from} -> {to}")]
    TransitionRejected {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Concurrent update conflict on {0}")]
    Conflict(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RegistryError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists(key.into())
    }
}

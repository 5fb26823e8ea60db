//! Service error types.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ServiceError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<reel_registry::RegistryError> for ServiceError {
    fn from(e: reel_registry::RegistryError) -> Self {
        match e {
            reel_registry::RegistryError::NotFound(key) => Self::NotFound(key),
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<reel_storage::StorageError> for ServiceError {
    fn from(e: reel_storage::StorageError) -> Self {
        match e {
            reel_storage::StorageError::NotFound(key) => Self::NotFound(key),
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<reel_queue::QueueError> for ServiceError {
    fn from(e: reel_queue::QueueError) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

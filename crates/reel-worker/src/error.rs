//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Infrastructure-level worker errors. Stage and pipeline failures
/// travel as `reel_models::JobError` so they can be persisted on the
/// job row verbatim.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Registry error: {0}")]
    Registry(#[from] reel_registry::RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] reel_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while driving external media tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Tool exited with status {exit_code:?}: {stderr_tail}")]
    ToolFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Tool timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Stderr fragments that mark a tool failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "resource temporarily unavailable",
    "connection reset",
    "connection refused",
    "input/output error",
    "temporarily",
    "timed out",
];

impl MediaError {
    pub fn tool_failed(exit_code: Option<i32>, stderr_tail: impl Into<String>) -> Self {
        Self::ToolFailed {
            exit_code,
            stderr_tail: stderr_tail.into(),
        }
    }

    /// Whether this failure is worth retrying.
    ///
    /// Timeouts are retryable; non-zero exits only when the stderr
    /// tail matches a recognised transient pattern.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Timeout(_) => true,
            MediaError::ToolFailed { stderr_tail, .. } => {
                let lower = stderr_tail.to_lowercase();
                TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
            }
            MediaError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MediaError::Timeout(60).is_transient());
        assert!(
            MediaError::tool_failed(Some(1), "av_read_frame: Resource temporarily unavailable")
                .is_transient()
        );
        assert!(!MediaError::tool_failed(Some(1), "Invalid data found when processing input")
            .is_transient());
        assert!(!MediaError::Cancelled.is_transient());
    }
}

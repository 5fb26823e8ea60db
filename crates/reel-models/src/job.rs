//! Job record, status transition table, and error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::artifact::ArtifactId;
use crate::style::Style;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status.
///
/// Terminal statuses are absorbing: once a job reaches `Completed`,
/// `Failed`, or `Cancelled`, no further status write is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job is waiting in the queue
    #[default]
    Pending,
    /// Inputs are still being uploaded (owned by the upload surface)
    Uploading,
    /// A worker holds the lease and the pipeline is running
    Processing,
    /// Pipeline finished and the output artifact is set
    Completed,
    /// Pipeline failed fatally or exhausted its attempts
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Uploading => "UPLOADING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Central transition table. Every status write goes through a
    /// compare-and-set that consults this.
    ///
    /// `Processing -> Processing` is allowed so a worker can re-enter a
    /// job whose previous lease expired. `Uploading` follows the same
    /// edges as `Pending`.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Pending | Uploading | Processing, Processing) => true,
            (Pending | Uploading | Processing, Completed) => true,
            (Pending | Uploading | Processing, Failed) => true,
            (Pending | Uploading | Processing, Cancelled) => true,
            (Uploading, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kinds surfaced on `Job.error.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request validation failed; never reaches the pipeline
    InvalidInput,
    /// Metadata or blob store unreachable
    StorageUnavailable,
    /// Tool exited non-zero with a recognised transient pattern, or timed out
    TransientTool,
    /// Tool exited non-zero deterministically
    FatalTool,
    /// Beat analyzer could not produce a plan
    AnalysisFailed,
    /// Cut planner could not produce a coherent segment set
    PlanInfeasible,
    /// Output failed the final container check
    QualityGateFailed,
    /// The job was cancelled by the user
    Cancelled,
}

impl ErrorKind {
    /// Whether the worker should retry the whole job on this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StorageUnavailable | ErrorKind::TransientTool)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::TransientTool => "transient_tool",
            ErrorKind::FatalTool => "fatal_tool",
            ErrorKind::AnalysisFailed => "analysis_failed",
            ErrorKind::PlanInfeasible => "plan_infeasible",
            ErrorKind::QualityGateFailed => "quality_gate_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Structured error persisted on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    /// Stage that produced the error, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Human-readable detail; tool stderr tails are trimmed to 2 KiB
    pub message: String,
    pub retryable: bool,
}

/// Maximum length of a persisted error message.
pub const MAX_ERROR_MESSAGE_BYTES: usize = 2048;

impl JobError {
    pub fn new(kind: ErrorKind, stage: Option<&str>, message: impl Into<String>) -> Self {
        let mut message: String = message.into();
        if message.len() > MAX_ERROR_MESSAGE_BYTES {
            // Trim on a char boundary
            let mut cut = MAX_ERROR_MESSAGE_BYTES;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        Self {
            kind,
            stage: stage.map(|s| s.to_string()),
            message,
            retryable: kind.is_retryable(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "{} in {}: {}", self.kind.as_str(), stage, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

/// The durable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Job status
    #[serde(default)]
    pub status: JobStatus,

    /// Style preset applied to the reel
    pub style: Style,

    /// Progress (0-100, monotonic non-decreasing)
    #[serde(default)]
    pub progress: u8,

    /// Short human label of the active stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    /// Names of the input clip artifacts, in user order
    pub clip_names: Vec<String>,

    /// Name of the input audio artifact
    pub audio_name: String,

    /// Window of the audio track used for the reel
    pub audio_window: crate::request::AudioWindow,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Completed at timestamp (terminal states)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Structured error (failed jobs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Output artifact, set only when status is `Completed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_artifact_id: Option<ArtifactId>,

    /// Incremented on every worker pickup
    #[serde(default)]
    pub attempt_count: u32,

    /// Timestamp of the most recent worker lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pickup_at: Option<DateTime<Utc>>,

    /// Timestamp after which the reaper may delete this job
    pub retention_deadline: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        style: Style,
        clip_names: Vec<String>,
        audio_name: impl Into<String>,
        audio_window: crate::request::AudioWindow,
        retention_deadline: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            style,
            progress: 0,
            current_step: None,
            clip_names,
            audio_name: audio_name.into(),
            audio_window,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            output_artifact_id: None,
            attempt_count: 0,
            last_pickup_at: None,
            retention_deadline,
        }
    }

    /// Number of input clips.
    pub fn clip_count(&self) -> usize {
        self.clip_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::AudioWindow;

    fn sample_job() -> Job {
        Job::new(
            Style::EnergeticDance,
            vec!["clip_0".into(), "clip_1".into()],
            "track",
            AudioWindow::new(10.0, 40.0),
            Utc::now() + chrono::Duration::hours(24),
        )
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempt_count, 0);
        assert!(job.output_artifact_id.is_none());
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::*;

        // Pickup and re-entry
        assert!(Pending.can_transition(Processing));
        assert!(Processing.can_transition(Processing));
        assert!(Uploading.can_transition(Processing));

        // Terminal edges
        assert!(Processing.can_transition(Completed));
        assert!(Processing.can_transition(Failed));
        assert!(Pending.can_transition(Cancelled));
        assert!(Processing.can_transition(Cancelled));

        // Terminal states are absorbing
        for terminal in [Completed, Failed, Cancelled] {
            for to in [Pending, Uploading, Processing, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition(to), "{terminal:?} -> {to:?}");
            }
        }

        // No backwards edges
        assert!(!Processing.can_transition(Pending));
        assert!(!Pending.can_transition(Uploading));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let back: JobStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(back, JobStatus::Cancelled);
    }

    #[test]
    fn test_error_kind_retryability() {
        assert!(ErrorKind::TransientTool.is_retryable());
        assert!(ErrorKind::StorageUnavailable.is_retryable());
        assert!(!ErrorKind::FatalTool.is_retryable());
        assert!(!ErrorKind::QualityGateFailed.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
    }

    #[test]
    fn test_error_message_trimmed() {
        let long = "x".repeat(8192);
        let err = JobError::new(ErrorKind::FatalTool, Some("mux"), long);
        assert_eq!(err.message.len(), MAX_ERROR_MESSAGE_BYTES);
        assert!(!err.retryable);
        assert_eq!(err.stage.as_deref(), Some("mux"));
    }

    #[test]
    fn test_job_roundtrip() {
        let job = sample_job();
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.clip_count(), 2);
    }
}

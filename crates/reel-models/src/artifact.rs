//! Artifact records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::job::JobId;

/// Stage name used for user-uploaded inputs.
pub const INPUT_STAGE: &str = "input";

/// Unique identifier for an artifact row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad content class of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Video,
    Audio,
    Image,
    Json,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Video => "video",
            ContentKind::Audio => "audio",
            ContentKind::Image => "image",
            ContentKind::Json => "json",
        }
    }

    /// MIME type used when uploading to the blob store.
    pub fn content_type(&self) -> &'static str {
        match self {
            ContentKind::Video => "video/mp4",
            ContentKind::Audio => "audio/mp4",
            ContentKind::Image => "image/jpeg",
            ContentKind::Json => "application/json",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file produced or consumed by a stage.
///
/// `(job_id, stage, name)` is unique, and rows are immutable once
/// written. Deletion happens only via the reaper or on cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    /// Producing stage name, or `input` for user uploads
    pub stage: String,
    /// Stable name within the stage, e.g. `normalized_3`
    pub name: String,
    /// Opaque handle into the blob store
    pub blob_key: String,
    /// Size in bytes
    pub size: u64,
    pub content_kind: ContentKind,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        job_id: JobId,
        stage: impl Into<String>,
        name: impl Into<String>,
        blob_key: impl Into<String>,
        size: u64,
        content_kind: ContentKind,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            job_id,
            stage: stage.into(),
            name: name.into(),
            blob_key: blob_key.into(),
            size,
            content_kind,
            created_at: Utc::now(),
        }
    }

    /// Whether this artifact is a user upload rather than a stage output.
    pub fn is_input(&self) -> bool {
        self.stage == INPUT_STAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_detection() {
        let job_id = JobId::new();
        let input = Artifact::new(
            job_id.clone(),
            INPUT_STAGE,
            "clip_0",
            "abc/input/clip_0",
            1024,
            ContentKind::Video,
        );
        assert!(input.is_input());

        let output = Artifact::new(job_id, "beats", "beat_plan", "abc/beats/beat_plan", 64, ContentKind::Json);
        assert!(!output.is_input());
        assert_eq!(output.content_kind.content_type(), "application/json");
    }
}

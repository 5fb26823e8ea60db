//! Progress events published while a job runs.
//!
//! Job rows remain the source of truth; events are best-effort
//! notifications for clients holding a live subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event envelope published on a job's progress channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Log line with timestamp
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress update (0-100) with the active step label
    Progress { percent: u8, step: String },

    /// Processing complete; the output artifact is available
    Done { output_artifact_id: String },

    /// Terminal failure
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn progress(percent: u8, step: impl Into<String>) -> Self {
        Self::Progress {
            percent: percent.min(100),
            step: step.into(),
        }
    }

    pub fn done(output_artifact_id: impl Into<String>) -> Self {
        Self::Done {
            output_artifact_id: output_artifact_id.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_clamped() {
        match JobEvent::progress(150, "mux") {
            JobEvent::Progress { percent, step } => {
                assert_eq!(percent, 100);
                assert_eq!(step, "mux");
            }
            _ => panic!("expected progress event"),
        }
    }

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_string(&JobEvent::done("abc")).unwrap();
        assert!(json.contains("\"type\":\"done\""));
    }
}

//! Analysis and planning error types.

use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Beat analyzer failures. All of them are fatal for the job.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Audio unreadable: {0}")]
    Unreadable(String),

    #[error("Audio too short: {actual_sec:.2}s, need at least {min_sec:.2}s")]
    TooShort { actual_sec: f64, min_sec: f64 },

    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
}

pub type PlanResult<T> = Result<T, PlanError>;

/// Cut planner failures. All of them are fatal for the job.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Infeasible plan: {0}")]
    Infeasible(String),
}

impl PlanError {
    pub fn infeasible(msg: impl Into<String>) -> Self {
        Self::Infeasible(msg.into())
    }
}

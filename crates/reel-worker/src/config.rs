//! Worker configuration.

use std::time::Duration;

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Per-stage timeouts enforced by the tool invoker.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub audio_slice: Duration,
    pub beats: Duration,
    pub plan: Duration,
    pub normalize: Duration,
    pub cut_and_concat: Duration,
    pub style_grade: Duration,
    pub mux: Duration,
    pub quality_gate: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            audio_slice: Duration::from_secs(60),
            beats: Duration::from_secs(60),
            plan: Duration::from_secs(30),
            normalize: Duration::from_secs(180),
            cut_and_concat: Duration::from_secs(240),
            style_grade: Duration::from_secs(120),
            mux: Duration::from_secs(60),
            quality_gate: Duration::from_secs(30),
        }
    }
}

impl StageTimeouts {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self {
            audio_slice: env_secs("STAGE_TIMEOUT_AUDIO_SLICE", 60),
            beats: env_secs("STAGE_TIMEOUT_BEATS", 60),
            plan: env_secs("STAGE_TIMEOUT_PLAN", 30),
            normalize: env_secs("STAGE_TIMEOUT_NORMALIZE", 180),
            cut_and_concat: env_secs("STAGE_TIMEOUT_CUT_AND_CONCAT", 240),
            style_grade: env_secs("STAGE_TIMEOUT_STYLE_GRADE", 120),
            mux: env_secs("STAGE_TIMEOUT_MUX", 60),
            quality_gate: env_secs("STAGE_TIMEOUT_QUALITY_GATE", 30),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrently processed jobs per worker process
    pub max_concurrent_jobs: usize,
    /// Concurrent stage bodies within one job (N_clip)
    pub clip_parallel: usize,
    /// Whole-job attempts before a retryable failure becomes terminal
    pub max_attempts: u32,
    /// Retry backoff base delay
    pub backoff_base: Duration,
    /// Retry backoff ceiling
    pub backoff_cap: Duration,
    /// Scratch directory for per-job working files
    pub work_dir: String,
    /// Grace period between SIGTERM and hard kill on tool timeout
    pub tool_grace: Duration,
    /// Per-stage tool timeouts
    pub stage_timeouts: StageTimeouts,
    /// Retention horizon after a terminal state
    pub retention_terminal: Duration,
    /// Retention horizon for abandoned non-terminal jobs
    pub retention_abandoned: Duration,
    /// Reaper cadence
    pub reaper_interval: Duration,
    /// Abandoned-job scan cadence (also promotes delayed messages)
    pub rescue_interval: Duration,
    /// Slack added to the visibility timeout before a lease counts as dead
    pub lease_slack: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            clip_parallel: 2,
            max_attempts: 2,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(600),
            work_dir: "/tmp/reelbeat".to_string(),
            tool_grace: Duration::from_secs(5),
            stage_timeouts: StageTimeouts::default(),
            retention_terminal: Duration::from_secs(3600),
            retention_abandoned: Duration::from_secs(86_400),
            reaper_interval: Duration::from_secs(600),
            rescue_interval: Duration::from_secs(60),
            lease_slack: Duration::from_secs(120),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS", 2),
            clip_parallel: env_parse("WORKER_CLIP_PARALLEL", 2),
            max_attempts: env_parse("MAX_ATTEMPTS", 2),
            backoff_base: env_secs("WORKER_BACKOFF_BASE_SECS", 30),
            backoff_cap: env_secs("WORKER_BACKOFF_CAP_SECS", 600),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .unwrap_or_else(|_| "/tmp/reelbeat".to_string()),
            tool_grace: env_secs("WORKER_TOOL_GRACE_SECS", 5),
            stage_timeouts: StageTimeouts::from_env(),
            retention_terminal: env_secs("RETENTION_TERMINAL_SECS", 3600),
            retention_abandoned: env_secs("RETENTION_ABANDONED_SECS", 86_400),
            reaper_interval: env_secs("REAPER_INTERVAL_SECS", 600),
            rescue_interval: env_secs("RESCUE_INTERVAL_SECS", 60),
            lease_slack: env_secs("LEASE_SLACK_SECS", 120),
        }
    }

    /// Backoff before attempt `attempt_count + 1`, exponential with a cap.
    pub fn backoff_for_attempt(&self, attempt_count: u32) -> Duration {
        let exp = attempt_count.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(2u32.pow(exp));
        delay.min(self.backoff_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let config = WorkerConfig::default();
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(30));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(60));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(120));
        // Cap at ten minutes
        assert_eq!(config.backoff_for_attempt(10), Duration::from_secs(600));
        // Degenerate zero attempt behaves like the first
        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(30));
    }

    #[test]
    fn test_default_timeouts() {
        let t = StageTimeouts::default();
        assert_eq!(t.cut_and_concat, Duration::from_secs(240));
        assert_eq!(t.quality_gate, Duration::from_secs(30));
    }
}

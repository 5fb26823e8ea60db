//! Monotonic, coalesced progress publication.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use reel_models::JobId;
use reel_queue::ProgressChannel;
use reel_registry::JobRepository;

/// Updates closer together than this are coalesced unless they move
/// the percent meaningfully or change the step label.
const COALESCE_WINDOW: Duration = Duration::from_millis(500);
/// Percent delta that always goes through.
const COALESCE_MIN_DELTA: u8 = 5;

#[derive(Debug)]
struct Inner {
    last_percent: u8,
    last_step: String,
    last_write: Option<Instant>,
}

/// Serializes stage-level progress into monotonic `(percent, step)`
/// writes on the job row, with best-effort pub/sub events alongside.
pub struct ProgressPublisher {
    job_id: JobId,
    jobs: JobRepository,
    channel: Arc<ProgressChannel>,
    inner: Mutex<Inner>,
}

impl ProgressPublisher {
    pub fn new(job_id: JobId, jobs: JobRepository, channel: Arc<ProgressChannel>) -> Self {
        Self {
            job_id,
            jobs,
            channel,
            inner: Mutex::new(Inner {
                last_percent: 0,
                last_step: String::new(),
                last_write: None,
            }),
        }
    }

    /// Publish a progress update. Non-monotonic percents are dropped;
    /// high-frequency updates are coalesced. Row-write failures are
    /// surfaced, event failures are not.
    pub async fn publish(&self, percent: u8, step: &str) -> Result<(), reel_registry::RegistryError> {
        let percent = percent.min(100);

        {
            let mut inner = self.inner.lock().await;

            if percent < inner.last_percent {
                debug!(
                    job_id = %self.job_id,
                    "Dropping non-monotonic progress {} < {}",
                    percent,
                    inner.last_percent
                );
                return Ok(());
            }

            let step_changed = inner.last_step != step;
            let small_delta = percent.saturating_sub(inner.last_percent) < COALESCE_MIN_DELTA;
            let recent = inner
                .last_write
                .is_some_and(|t| t.elapsed() < COALESCE_WINDOW);

            if recent && small_delta && !step_changed && percent < 100 {
                return Ok(());
            }

            inner.last_percent = percent;
            inner.last_step = step.to_string();
            inner.last_write = Some(Instant::now());
        }

        self.jobs.update_progress(&self.job_id, percent, step).await?;
        self.channel.progress(&self.job_id, percent, step).await.ok();
        Ok(())
    }

    /// Best-effort log line on the event channel.
    pub async fn log(&self, message: impl Into<String>) {
        self.channel.log(&self.job_id, message).await.ok();
    }
}

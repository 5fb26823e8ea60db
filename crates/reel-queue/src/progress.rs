//! Progress events via Redis Pub/Sub.
//!
//! Events are best-effort; the job row is the durable record.

use redis::AsyncCommands;
use tracing::debug;

use reel_models::{JobEvent, JobId};

use crate::error::QueueResult;

/// Channel for publishing/subscribing to job events.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("reel:progress:{}", job_id)
    }

    /// Publish an event.
    pub async fn publish(&self, job_id: &JobId, event: &JobEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing job event to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    /// Publish a log line.
    pub async fn log(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::log(message)).await
    }

    /// Publish a progress update.
    pub async fn progress(
        &self,
        job_id: &JobId,
        percent: u8,
        step: impl Into<String>,
    ) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::progress(percent, step)).await
    }

    /// Publish completion.
    pub async fn done(&self, job_id: &JobId, output_artifact_id: &str) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::done(output_artifact_id)).await
    }

    /// Publish a terminal error.
    pub async fn error(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::error(message)).await
    }

    /// Subscribe to events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = JobEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        let job_id = JobId::from_string("j7");
        assert_eq!(ProgressChannel::channel_name(&job_id), "reel:progress:j7");
    }
}

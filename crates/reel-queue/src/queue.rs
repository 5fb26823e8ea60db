//! Job queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::StartMessage;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for start messages
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Sorted set holding delayed messages
    pub scheduled_name: String,
    /// Message visibility timeout (T_vis)
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:jobs".to_string(),
            consumer_group: "reel:workers".to_string(),
            scheduled_name: "reel:scheduled".to_string(),
            visibility_timeout: Duration::from_secs(900), // 15 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "reel:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "reel:workers".to_string()),
            scheduled_name: std::env::var("QUEUE_SCHEDULED")
                .unwrap_or_else(|_| "reel:scheduled".to_string()),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Message visibility timeout.
    pub fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a start message with no delay.
    pub async fn enqueue(&self, message: &StartMessage) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(message)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!(
            "Enqueued start message for job {} with message ID {}",
            message.job_id, message_id
        );
        Ok(message_id)
    }

    /// Enqueue a start message after `delay`.
    ///
    /// The message is parked in a sorted set scored by its due time
    /// and moved onto the stream by [`promote_due`](Self::promote_due).
    /// This is how a worker NACKs with retry backoff.
    pub async fn enqueue_with_delay(
        &self,
        message: &StartMessage,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(message)?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let visible_at = now + delay.as_secs();

        redis::cmd("ZADD")
            .arg(&self.config.scheduled_name)
            .arg(visible_at)
            .arg(&payload)
            .query_async::<()>(&mut conn)
            .await?;

        info!(
            job_id = %message.job_id,
            delay_secs = delay.as_secs(),
            "Scheduled delayed start message"
        );
        Ok(())
    }

    /// Move due delayed messages onto the stream.
    ///
    /// Called periodically by the scheduler. Returns how many messages
    /// were promoted.
    pub async fn promote_due(&self) -> QueueResult<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.config.scheduled_name)
            .arg(0)
            .arg(now)
            .query_async(&mut conn)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut moved = 0;
        for payload in &due {
            match serde_json::from_str::<StartMessage>(payload) {
                Ok(message) => match self.enqueue(&message).await {
                    Ok(_) => moved += 1,
                    Err(e) => {
                        warn!("Failed to promote scheduled message: {}", e);
                        continue; // keep it scheduled for the next pass
                    }
                },
                Err(e) => {
                    warn!("Dropping unparseable scheduled message: {}", e);
                }
            }

            redis::cmd("ZREM")
                .arg(&self.config.scheduled_name)
                .arg(payload)
                .query_async::<()>(&mut conn)
                .await
                .ok();
        }

        if moved > 0 {
            info!(count = moved, "Promoted scheduled messages");
        }
        Ok(moved)
    }

    /// Acknowledge a message (processing finished one way or another).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Negative acknowledgement with backoff: the original delivery is
    /// acked and a fresh copy is scheduled after `delay`.
    pub async fn nack_with_delay(
        &self,
        message_id: &str,
        message: &StartMessage,
        delay: Duration,
    ) -> QueueResult<()> {
        self.enqueue_with_delay(message, delay).await?;
        self.ack(message_id).await?;
        info!(
            job_id = %message.job_id,
            delay_secs = delay.as_secs(),
            "NACKed message with delay"
        );
        Ok(())
    }

    /// Consume new messages from the stream.
    /// Returns `(message_id, message)` pairs.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, StartMessage)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut messages = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();

                if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                    let payload_str = String::from_utf8_lossy(payload);
                    match serde_json::from_str::<StartMessage>(&payload_str) {
                        Ok(message) => {
                            debug!("Consumed start message for job {}", message.job_id);
                            messages.push((message_id, message));
                        }
                        Err(e) => {
                            warn!("Failed to parse message payload: {}", e);
                            // Ack the malformed message to prevent reprocessing
                            self.ack(&message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(messages)
    }

    /// Claim messages whose holder has been idle past the visibility
    /// timeout. This is how jobs abandoned by dead workers are
    /// redelivered.
    pub async fn claim_expired(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, StartMessage)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        // XAUTOCLAIM scans pending entries and re-delivers those idle
        // past the threshold in one round trip.
        let reply: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut messages = Vec::new();
        for entry in reply.claimed {
            let message_id = entry.id.clone();
            if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                let payload_str = String::from_utf8_lossy(payload);
                match serde_json::from_str::<StartMessage>(&payload_str) {
                    Ok(message) => {
                        info!("Claimed expired message for job {}", message.job_id);
                        messages.push((message_id, message));
                    }
                    Err(e) => {
                        warn!("Failed to parse claimed payload: {}", e);
                        self.ack(&message_id).await.ok();
                    }
                }
            }
        }

        Ok(messages)
    }

    /// Stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Number of parked delayed messages.
    pub async fn scheduled_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.zcard(&self.config.scheduled_name).await?;
        Ok(len)
    }
}

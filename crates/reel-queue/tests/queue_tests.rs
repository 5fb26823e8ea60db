//! Queue integration tests.

use std::time::Duration;

use reel_models::JobId;
use reel_queue::{JobQueue, QueueConfig, StartMessage};

fn queue() -> JobQueue {
    let config = QueueConfig {
        stream_name: "reel:test:jobs".to_string(),
        consumer_group: "reel:test:workers".to_string(),
        scheduled_name: "reel:test:scheduled".to_string(),
        ..QueueConfig::from_env()
    };
    JobQueue::new(config).expect("redis client")
}

/// Enqueue then consume one start message.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = queue();
    queue.init().await.unwrap();

    let message = StartMessage::new(JobId::new());
    queue.enqueue(&message).await.unwrap();

    let consumed = queue.consume("test-consumer", 1000, 5).await.unwrap();
    let (message_id, received) = consumed
        .into_iter()
        .find(|(_, m)| m.job_id == message.job_id)
        .expect("message delivered");
    assert_eq!(received, message);

    queue.ack(&message_id).await.unwrap();
}

/// Delayed messages stay parked until promoted after their due time.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_delayed_promotion() {
    let queue = queue();
    queue.init().await.unwrap();

    let message = StartMessage::new(JobId::new());
    queue
        .enqueue_with_delay(&message, Duration::from_secs(1))
        .await
        .unwrap();

    // Not yet due
    assert_eq!(queue.promote_due().await.unwrap(), 0);
    assert!(queue.scheduled_len().await.unwrap() >= 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(queue.promote_due().await.unwrap() >= 1);
}

//! Redis Streams job queue for ReelBeat.
//!
//! This crate provides:
//! - FIFO start-message enqueueing with at-least-once delivery
//! - Consumer-group consumption with per-message visibility:
//!   messages held by a dead worker are reclaimed after the
//!   visibility timeout
//! - Delayed re-enqueue for retry backoff
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod message;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use message::StartMessage;
pub use progress::ProgressChannel;
pub use queue::{JobQueue, QueueConfig};

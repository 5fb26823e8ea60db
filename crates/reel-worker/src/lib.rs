//! ReelBeat rendering worker.
//!
//! A worker pulls start messages from the queue, leases the job via
//! the registry's guarded pickup, and drives the stage graph:
//!
//! ```text
//! audio_slice ─┬─> beats ─> plan ──────┐
//!              └─> normalize_{i} ... ──┴─> cut_and_concat
//!                  -> style_grade -> mux -> quality_gate
//! ```
//!
//! Alongside the pickup loop, the scheduler promotes delayed retry
//! messages, re-enqueues jobs abandoned by dead workers, and runs the
//! retention reaper.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod reaper;
pub mod scheduler;
pub mod stage;
pub mod worker;

pub use config::{StageTimeouts, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use pipeline::{PipelineExecutor, PipelineFailure, StageName};
pub use progress::ProgressPublisher;
pub use reaper::RetentionReaper;
pub use scheduler::Scheduler;
pub use stage::StageRunner;
pub use worker::Worker;

//! Metadata store adapter for ReelBeat.
//!
//! Job and artifact rows live in Redis. Every job status write goes
//! through a compare-and-set against the transition table in
//! `reel_models::JobStatus`, so concurrent workers, the scheduler,
//! and user cancellation cannot race a job into an invalid state.

pub mod artifacts;
pub mod client;
pub mod error;
pub mod jobs;

pub use artifacts::ArtifactRepository;
pub use client::{RegistryClient, RegistryConfig};
pub use error::{RegistryError, RegistryResult};
pub use jobs::JobRepository;

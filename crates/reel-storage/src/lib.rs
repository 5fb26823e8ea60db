//! Blob storage for ReelBeat.
//!
//! Two layers:
//! - [`BlobClient`]: a thin typed wrapper over an S3-compatible
//!   bucket (`put` / `get` / `delete` / `stat` / presigned GET).
//! - [`ArtifactStore`]: the adapter the pipeline uses. It namespaces
//!   blobs as `{job_id}/{stage}/{name}`, records every write as an
//!   `Artifact` row in the registry, and refuses writes for jobs that
//!   do not exist or are already terminal.

pub mod artifacts;
pub mod client;
pub mod error;

pub use artifacts::ArtifactStore;
pub use client::{BlobClient, BlobConfig};
pub use error::{StorageError, StorageResult};

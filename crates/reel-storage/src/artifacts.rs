//! Artifact store adapter.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use reel_models::{Artifact, ArtifactId, ContentKind, JobId};
use reel_registry::{ArtifactRepository, JobRepository};

use crate::client::BlobClient;
use crate::error::{StorageError, StorageResult};

/// How long a presigned output URL stays valid.
const OUTPUT_URL_TTL: Duration = Duration::from_secs(3600);

/// Typed wrapper over the blob store used by every stage.
///
/// Blobs are namespaced `{job_id}/{stage}/{name}` and every write is
/// recorded as an `Artifact` row. Writes are refused for jobs that do
/// not exist or are already terminal, so a worker that lost its lease
/// after the job was cancelled or failed cannot leave orphan blobs
/// behind.
#[derive(Clone)]
pub struct ArtifactStore {
    blobs: BlobClient,
    jobs: JobRepository,
    rows: ArtifactRepository,
}

impl ArtifactStore {
    pub fn new(blobs: BlobClient, jobs: JobRepository, rows: ArtifactRepository) -> Self {
        Self { blobs, jobs, rows }
    }

    /// Blob key for an artifact triple.
    pub fn blob_key(job_id: &JobId, stage: &str, name: &str) -> String {
        format!("{}/{}/{}", job_id, stage, name)
    }

    /// Store a local file as a stage output.
    pub async fn put_file(
        &self,
        job_id: &JobId,
        stage: &str,
        name: &str,
        path: impl AsRef<Path>,
        content_kind: ContentKind,
    ) -> StorageResult<Artifact> {
        self.check_writable(job_id).await?;

        let key = Self::blob_key(job_id, stage, name);
        let size = self
            .blobs
            .put_file(path, &key, content_kind.content_type())
            .await?;

        let artifact = Artifact::new(job_id.clone(), stage, name, key, size, content_kind);
        let artifact = self.record_idempotent(artifact).await?;

        info!(job_id = %job_id, stage, name, size, "Stored artifact");
        Ok(artifact)
    }

    /// Store a serializable value as a JSON artifact.
    pub async fn put_json<T: Serialize>(
        &self,
        job_id: &JobId,
        stage: &str,
        name: &str,
        value: &T,
    ) -> StorageResult<Artifact> {
        self.check_writable(job_id).await?;

        let key = Self::blob_key(job_id, stage, name);
        let payload = serde_json::to_vec(value)?;
        let size = self
            .blobs
            .put_bytes(payload, &key, ContentKind::Json.content_type())
            .await?;

        let artifact = Artifact::new(job_id.clone(), stage, name, key, size, ContentKind::Json);
        let artifact = self.record_idempotent(artifact).await?;

        info!(job_id = %job_id, stage, name, size, "Stored JSON artifact");
        Ok(artifact)
    }

    /// Record a row, treating a pre-existing row as success.
    ///
    /// Blob keys are deterministic per `(job, stage, name)` and stage
    /// bodies are deterministic, so a re-run after a crashed attempt
    /// writes the same content under the same key; the original row
    /// stays authoritative.
    async fn record_idempotent(&self, artifact: Artifact) -> StorageResult<Artifact> {
        match self.rows.record(&artifact).await {
            Ok(()) => Ok(artifact),
            Err(reel_registry::RegistryError::AlreadyExists(_)) => {
                let existing = self
                    .rows
                    .get(&artifact.job_id, &artifact.stage, &artifact.name)
                    .await?;
                debug!(
                    job_id = %artifact.job_id,
                    stage = %artifact.stage,
                    name = %artifact.name,
                    "Artifact row already recorded, keeping original"
                );
                Ok(existing.unwrap_or(artifact))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve an artifact row by its addressing triple.
    pub async fn get(&self, job_id: &JobId, stage: &str, name: &str) -> StorageResult<Artifact> {
        self.rows
            .get(job_id, stage, name)
            .await?
            .ok_or_else(|| StorageError::not_found(Self::blob_key(job_id, stage, name)))
    }

    /// Whether an artifact exists.
    pub async fn exists(&self, job_id: &JobId, stage: &str, name: &str) -> StorageResult<bool> {
        Ok(self.rows.get(job_id, stage, name).await?.is_some())
    }

    /// Download an artifact's blob to a local scratch path.
    pub async fn fetch_to_path(
        &self,
        artifact: &Artifact,
        path: impl AsRef<Path>,
    ) -> StorageResult<()> {
        self.blobs.get_file(&artifact.blob_key, path).await
    }

    /// Download and deserialize a JSON artifact.
    pub async fn fetch_json<T: DeserializeOwned>(&self, artifact: &Artifact) -> StorageResult<T> {
        let bytes = self.blobs.get_bytes(&artifact.blob_key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Delete an artifact, blob first, then the row.
    pub async fn delete(&self, artifact: &Artifact) -> StorageResult<()> {
        self.blobs.delete(&artifact.blob_key).await?;
        self.rows.delete(artifact).await?;
        debug!(
            job_id = %artifact.job_id,
            stage = %artifact.stage,
            name = %artifact.name,
            "Deleted artifact"
        );
        Ok(())
    }

    /// All artifacts recorded for a job.
    pub async fn list_for_job(&self, job_id: &JobId) -> StorageResult<Vec<Artifact>> {
        Ok(self.rows.list_for_job(job_id).await?)
    }

    /// Artifacts produced by one stage of a job.
    pub async fn list_for_stage(
        &self,
        job_id: &JobId,
        stage: &str,
    ) -> StorageResult<Vec<Artifact>> {
        let mut artifacts = self.rows.list_for_job(job_id).await?;
        artifacts.retain(|a| a.stage == stage);
        Ok(artifacts)
    }

    /// Presigned URL for a completed job's output artifact.
    pub async fn output_url(&self, artifact_id: &ArtifactId) -> StorageResult<String> {
        let artifact = self
            .rows
            .get_by_id(artifact_id)
            .await?
            .ok_or_else(|| StorageError::not_found(artifact_id.as_str()))?;
        self.blobs.presign_get(&artifact.blob_key, OUTPUT_URL_TTL).await
    }

    async fn check_writable(&self, job_id: &JobId) -> StorageResult<()> {
        let job = self.jobs.try_get(job_id).await?.ok_or_else(|| {
            StorageError::JobUnwritable {
                job_id: job_id.to_string(),
                reason: "job does not exist".to_string(),
            }
        })?;

        if job.status.is_terminal() {
            return Err(StorageError::JobUnwritable {
                job_id: job_id.to_string(),
                reason: format!("job is {}", job.status),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key_namespacing() {
        let job_id = JobId::from_string("job-1");
        assert_eq!(
            ArtifactStore::blob_key(&job_id, "normalize", "normalized_2"),
            "job-1/normalize/normalized_2"
        );
        assert_eq!(
            ArtifactStore::blob_key(&job_id, reel_models::INPUT_STAGE, "clip_0"),
            "job-1/input/clip_0"
        );
    }
}

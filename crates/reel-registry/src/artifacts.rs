//! Artifact row repository.

use redis::AsyncCommands;
use tracing::debug;

use reel_models::{Artifact, ArtifactId, JobId};

use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};

/// Repository for `Artifact` rows.
///
/// Rows are immutable: a second write to the same `(job, stage, name)`
/// is rejected. Deletion happens only via the reaper or cancellation
/// cleanup.
#[derive(Clone)]
pub struct ArtifactRepository {
    client: RegistryClient,
}

impl ArtifactRepository {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Record a new artifact row.
    pub async fn record(&self, artifact: &Artifact) -> RegistryResult<()> {
        let mut conn = self.client.conn().await?;
        let key = self
            .client
            .artifact_key(&artifact.job_id, &artifact.stage, &artifact.name);
        let payload = serde_json::to_string(artifact)?;

        let stored: bool = conn.set_nx(&key, &payload).await?;
        if !stored {
            return Err(RegistryError::already_exists(key));
        }

        let _: () = conn
            .set(self.client.artifact_id_key(artifact.id.as_str()), &key)
            .await?;
        let _: () = conn
            .sadd(self.client.job_artifacts_key(&artifact.job_id), &key)
            .await?;

        debug!(
            job_id = %artifact.job_id,
            stage = %artifact.stage,
            name = %artifact.name,
            "Recorded artifact row"
        );
        Ok(())
    }

    /// Load an artifact by its addressing triple.
    pub async fn get(
        &self,
        job_id: &JobId,
        stage: &str,
        name: &str,
    ) -> RegistryResult<Option<Artifact>> {
        let mut conn = self.client.conn().await?;
        let payload: Option<String> =
            conn.get(self.client.artifact_key(job_id, stage, name)).await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Load an artifact by its ID.
    pub async fn get_by_id(&self, artifact_id: &ArtifactId) -> RegistryResult<Option<Artifact>> {
        let mut conn = self.client.conn().await?;
        let row_key: Option<String> = conn
            .get(self.client.artifact_id_key(artifact_id.as_str()))
            .await?;
        let Some(row_key) = row_key else {
            return Ok(None);
        };
        let payload: Option<String> = conn.get(&row_key).await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// All artifacts recorded for a job.
    pub async fn list_for_job(&self, job_id: &JobId) -> RegistryResult<Vec<Artifact>> {
        let mut conn = self.client.conn().await?;
        let keys: Vec<String> = conn.smembers(self.client.job_artifacts_key(job_id)).await?;

        let mut artifacts = Vec::with_capacity(keys.len());
        for key in keys {
            let payload: Option<String> = conn.get(&key).await?;
            if let Some(p) = payload {
                artifacts.push(serde_json::from_str(&p)?);
            }
        }

        // Stable order for callers and tests
        artifacts.sort_by(|a: &Artifact, b: &Artifact| {
            (a.stage.as_str(), a.name.as_str()).cmp(&(b.stage.as_str(), b.name.as_str()))
        });
        Ok(artifacts)
    }

    /// Delete an artifact row and its index entries.
    pub async fn delete(&self, artifact: &Artifact) -> RegistryResult<()> {
        let mut conn = self.client.conn().await?;
        let key = self
            .client
            .artifact_key(&artifact.job_id, &artifact.stage, &artifact.name);

        let _: () = conn.del(&key).await?;
        let _: () = conn
            .del(self.client.artifact_id_key(artifact.id.as_str()))
            .await?;
        let _: () = conn
            .srem(self.client.job_artifacts_key(&artifact.job_id), &key)
            .await?;

        debug!(
            job_id = %artifact.job_id,
            stage = %artifact.stage,
            name = %artifact.name,
            "Deleted artifact row"
        );
        Ok(())
    }

    /// Delete every row index for a job (used after all rows are gone).
    pub async fn delete_job_index(&self, job_id: &JobId) -> RegistryResult<()> {
        let mut conn = self.client.conn().await?;
        let _: () = conn.del(self.client.job_artifacts_key(job_id)).await?;
        Ok(())
    }
}

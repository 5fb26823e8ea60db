//! Redis-backed registry client and key layout.

use redis::aio::MultiplexedConnection;

use reel_models::JobId;

use crate::error::RegistryResult;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key namespace prefix
    pub key_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "reel".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("REGISTRY_KEY_PREFIX").unwrap_or_else(|_| "reel".to_string()),
        }
    }
}

/// Shared client for the job/artifact row store.
#[derive(Clone)]
pub struct RegistryClient {
    client: redis::Client,
    prefix: String,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(config: RegistryConfig) -> RegistryResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            prefix: config.key_prefix,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> RegistryResult<Self> {
        Self::new(RegistryConfig::from_env())
    }

    pub(crate) async fn conn(&self) -> RegistryResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Key of a job row.
    pub fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Key of an artifact row.
    pub fn artifact_key(&self, job_id: &JobId, stage: &str, name: &str) -> String {
        format!("{}:artifact:{}:{}:{}", self.prefix, job_id, stage, name)
    }

    /// Secondary index from artifact ID to its row key.
    pub fn artifact_id_key(&self, artifact_id: &str) -> String {
        format!("{}:artifact_by_id:{}", self.prefix, artifact_id)
    }

    /// Set of artifact row keys belonging to a job.
    pub fn job_artifacts_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}:artifacts", self.prefix, job_id)
    }

    /// Sorted set of job IDs scored by retention deadline.
    pub fn deadlines_key(&self) -> String {
        format!("{}:jobs:deadlines", self.prefix)
    }

    /// Set of job IDs currently in `PROCESSING`.
    pub fn processing_key(&self) -> String {
        format!("{}:jobs:processing", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let client = RegistryClient::new(RegistryConfig::default()).unwrap();
        let job_id = JobId::from_string("j1");
        assert_eq!(client.job_key(&job_id), "reel:job:j1");
        assert_eq!(
            client.artifact_key(&job_id, "beats", "beat_plan"),
            "reel:artifact:j1:beats:beat_plan"
        );
        assert_eq!(client.deadlines_key(), "reel:jobs:deadlines");
    }
}

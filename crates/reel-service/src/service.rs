//! The `create` / `get` / `cancel` façade.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use reel_models::{
    Artifact, ArtifactId, ContentKind, CreateReelRequest, Job, JobError, JobId, JobStatus, Style,
    INPUT_STAGE,
};
use reel_queue::{JobQueue, StartMessage};
use reel_registry::{ArtifactRepository, JobRepository};
use reel_storage::ArtifactStore;

use crate::error::{ServiceError, ServiceResult};

/// Service limits and horizons.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Maximum input clips per job
    pub max_clip_count: usize,
    /// Maximum size per input artifact, bytes
    pub max_file_size: u64,
    /// Retention horizon for jobs that never reach a terminal state
    pub retention_abandoned: Duration,
    /// Retention horizon after cancellation
    pub retention_terminal: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_clip_count: 5,
            max_file_size: 100 * 1024 * 1024,
            retention_abandoned: Duration::from_secs(86_400),
            retention_terminal: Duration::from_secs(3600),
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_clip_count: std::env::var("MAX_CLIP_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            max_file_size: std::env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100 * 1024 * 1024),
            retention_abandoned: Duration::from_secs(
                std::env::var("RETENTION_ABANDONED_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400),
            ),
            retention_terminal: Duration::from_secs(
                std::env::var("RETENTION_TERMINAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }
}

/// Client-facing view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub style: Style,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub attempt_count: u32,
    /// Streamable URL for the finished reel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
}

/// Public job façade: the only entry points the HTTP layer uses.
///
/// All collaborators are injected handles; the service owns no
/// process-wide state.
pub struct JobService {
    jobs: JobRepository,
    artifact_rows: ArtifactRepository,
    store: ArtifactStore,
    queue: Arc<JobQueue>,
    config: ServiceConfig,
}

impl JobService {
    pub fn new(
        jobs: JobRepository,
        artifact_rows: ArtifactRepository,
        store: ArtifactStore,
        queue: Arc<JobQueue>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            jobs,
            artifact_rows,
            store,
            queue,
            config,
        }
    }

    /// Validate the request, persist the job, link its inputs, and
    /// enqueue the start message. Rolls back the rows if the enqueue
    /// fails so a client retry starts clean.
    pub async fn create(&self, request: CreateReelRequest) -> ServiceResult<JobId> {
        self.validate(&request)?;

        // Resolve the uploaded artifacts and check their kinds/sizes
        let mut clip_sources = Vec::with_capacity(request.clips.len());
        for (index, artifact_id) in request.clips.iter().enumerate() {
            let artifact = self.resolve_input(artifact_id).await?;
            if !matches!(artifact.content_kind, ContentKind::Video | ContentKind::Image) {
                return Err(ServiceError::invalid_input(format!(
                    "clip {index} is {}, expected video or image",
                    artifact.content_kind
                )));
            }
            clip_sources.push(artifact);
        }

        let audio_source = self.resolve_input(&request.audio).await?;
        if audio_source.content_kind != ContentKind::Audio {
            return Err(ServiceError::invalid_input(format!(
                "audio artifact is {}, expected audio",
                audio_source.content_kind
            )));
        }

        let clip_names: Vec<String> = (0..clip_sources.len())
            .map(|i| format!("clip_{i}"))
            .collect();
        let retention = Utc::now()
            + chrono::Duration::from_std(self.config.retention_abandoned)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let job = Job::new(
            request.style,
            clip_names.clone(),
            "audio",
            request.audio_window,
            retention,
        );
        let job_id = job.id.clone();

        self.jobs.create(&job).await?;

        // Link the uploaded blobs to the new job under the input stage
        let mut inputs: Vec<(&str, &Artifact)> = clip_names
            .iter()
            .map(String::as_str)
            .zip(clip_sources.iter())
            .collect();
        inputs.push(("audio", &audio_source));

        let mut linked = Vec::new();
        for (name, source) in inputs {
            let artifact = Artifact::new(
                job_id.clone(),
                INPUT_STAGE,
                name,
                source.blob_key.clone(),
                source.size,
                source.content_kind,
            );
            if let Err(e) = self.artifact_rows.record(&artifact).await {
                warn!(job_id = %job_id, "Input linking failed, rolling back: {}", e);
                self.rollback(&job_id, &linked).await;
                return Err(e.into());
            }
            linked.push(artifact);
        }

        if let Err(e) = self.queue.enqueue(&StartMessage::new(job_id.clone())).await {
            warn!(job_id = %job_id, "Enqueue failed, rolling back: {}", e);
            self.rollback(&job_id, &linked).await;
            return Err(e.into());
        }

        info!(
            job_id = %job_id,
            clips = clip_sources.len(),
            style = %request.style,
            "Created job"
        );
        Ok(job_id)
    }

    /// Current job state plus a streamable output URL when complete.
    pub async fn get(&self, job_id: &JobId) -> ServiceResult<JobView> {
        let job = self.jobs.get(job_id).await?;

        let output_url = match &job.output_artifact_id {
            Some(artifact_id) => Some(self.store.output_url(artifact_id).await?),
            None => None,
        };

        Ok(JobView {
            id: job.id,
            status: job.status,
            style: job.style,
            progress: job.progress,
            current_step: job.current_step,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            error: job.error,
            attempt_count: job.attempt_count,
            output_url,
        })
    }

    /// Cancel a pending or processing job.
    ///
    /// Idempotent: cancelling an already-cancelled job succeeds and
    /// returns `false`. The running pipeline observes the new status
    /// at its next stage boundary. Completed or failed jobs cannot be
    /// cancelled.
    pub async fn cancel(&self, job_id: &JobId) -> ServiceResult<bool> {
        let retention = Utc::now()
            + chrono::Duration::from_std(self.config.retention_terminal)
                .unwrap_or_else(|_| chrono::Duration::hours(1));

        match self.jobs.cancel(job_id, retention).await {
            Ok(transitioned) => {
                if transitioned {
                    info!(job_id = %job_id, "Job cancelled");
                }
                Ok(transitioned)
            }
            Err(reel_registry::RegistryError::TransitionRejected { from, .. }) => Err(
                ServiceError::invalid_input(format!("cannot cancel a {from} job")),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn validate(&self, request: &CreateReelRequest) -> ServiceResult<()> {
        if request.clips.is_empty() {
            return Err(ServiceError::invalid_input("at least one clip is required"));
        }
        if request.clips.len() > self.config.max_clip_count {
            return Err(ServiceError::invalid_input(format!(
                "{} clips exceeds the limit of {}",
                request.clips.len(),
                self.config.max_clip_count
            )));
        }
        if !request.audio_window.is_reel_length() {
            return Err(ServiceError::invalid_input(format!(
                "audio window must be exactly {}s, got {:.3}s",
                reel_models::REEL_DURATION_SEC,
                request.audio_window.length_sec()
            )));
        }
        if request.audio_window.start_sec < 0.0 {
            return Err(ServiceError::invalid_input(
                "audio window cannot start before zero",
            ));
        }
        Ok(())
    }

    async fn resolve_input(&self, artifact_id: &ArtifactId) -> ServiceResult<Artifact> {
        let artifact = self
            .artifact_rows
            .get_by_id(artifact_id)
            .await?
            .ok_or_else(|| {
                ServiceError::invalid_input(format!("unknown input artifact {artifact_id}"))
            })?;

        if artifact.size > self.config.max_file_size {
            return Err(ServiceError::invalid_input(format!(
                "artifact {artifact_id} is {} bytes, limit is {}",
                artifact.size, self.config.max_file_size
            )));
        }
        Ok(artifact)
    }

    /// Best-effort removal of partially created rows.
    async fn rollback(&self, job_id: &JobId, linked: &[Artifact]) {
        for artifact in linked {
            self.artifact_rows.delete(artifact).await.ok();
        }
        self.artifact_rows.delete_job_index(job_id).await.ok();
        self.jobs.delete(job_id).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::AudioWindow;

    fn request(clip_count: usize, window: AudioWindow) -> CreateReelRequest {
        CreateReelRequest {
            clips: (0..clip_count).map(|_| ArtifactId::new()).collect(),
            audio: ArtifactId::new(),
            audio_window: window,
            style: Style::EnergeticDance,
        }
    }

    fn service_config() -> ServiceConfig {
        ServiceConfig::default()
    }

    #[test]
    fn test_validation_rules() {
        let config = service_config();
        let validate = |request: &CreateReelRequest| -> ServiceResult<()> {
            // Mirror of JobService::validate without live handles
            if request.clips.is_empty() {
                return Err(ServiceError::invalid_input("at least one clip is required"));
            }
            if request.clips.len() > config.max_clip_count {
                return Err(ServiceError::invalid_input("too many clips"));
            }
            if !request.audio_window.is_reel_length() {
                return Err(ServiceError::invalid_input("bad window"));
            }
            Ok(())
        };

        assert!(validate(&request(3, AudioWindow::new(0.0, 30.0))).is_ok());
        assert!(validate(&request(0, AudioWindow::new(0.0, 30.0))).is_err());
        assert!(validate(&request(6, AudioWindow::new(0.0, 30.0))).is_err());
        assert!(validate(&request(2, AudioWindow::new(0.0, 29.0))).is_err());
    }

    #[test]
    fn test_job_view_serialization() {
        let view = JobView {
            id: JobId::from_string("j1"),
            status: JobStatus::Completed,
            style: Style::LuxeTravel,
            progress: 100,
            current_step: Some("complete".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: Some(Utc::now()),
            error: None,
            attempt_count: 1,
            output_url: Some("https://blobs.example/reel.mp4".into()),
        };
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("\"COMPLETED\""));
        assert!(json.contains("luxe_travel"));
        assert!(!json.contains("\"error\""));
    }
}

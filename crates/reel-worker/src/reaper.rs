//! Retention reaper: time-bounded cleanup of artifacts and job rows.

use chrono::Utc;
use tracing::{debug, info, warn};

use reel_models::{Job, JobId, JobStatus};
use reel_registry::JobRepository;
use reel_storage::ArtifactStore;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Jobs handled per reaper pass.
const REAP_BATCH: usize = 100;

/// Deletes expired jobs in dependency order: blobs first, then
/// artifact rows, then the job row. A blob deletion failure leaves
/// the job's rows intact for the next cycle; every pass is
/// idempotent.
pub struct RetentionReaper {
    jobs: JobRepository,
    store: ArtifactStore,
    config: WorkerConfig,
}

impl RetentionReaper {
    pub fn new(jobs: JobRepository, store: ArtifactStore, config: WorkerConfig) -> Self {
        Self { jobs, store, config }
    }

    /// One reaper pass. Returns how many jobs were fully removed.
    pub async fn run_once(&self) -> WorkerResult<usize> {
        let now = Utc::now();
        let due = self.jobs.due_for_reaping(now, REAP_BATCH).await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!("Reaper found {} due jobs", due.len());
        let mut reaped = 0;

        for job_id in due {
            match self.jobs.try_get(&job_id).await? {
                Some(job) => {
                    if !self.reapable(&job, now) {
                        debug!(job_id = %job_id, "Deadline passed but job is active, skipping");
                        continue;
                    }
                    if self.reap_job(&job_id).await {
                        reaped += 1;
                    }
                }
                None => {
                    // Row already gone; clear any leftover artifacts
                    // and indexes from a partially failed pass.
                    if self.reap_job(&job_id).await {
                        reaped += 1;
                    }
                }
            }
        }

        if reaped > 0 {
            info!("Reaped {} jobs", reaped);
        }
        Ok(reaped)
    }

    /// A job may be reaped when it is terminal, or non-terminal but
    /// abandoned past the abandonment horizon. The deadline index
    /// should only surface such jobs; this re-check keeps a freshly
    /// re-activated job safe regardless.
    fn reapable(&self, job: &Job, now: chrono::DateTime<Utc>) -> bool {
        if job.status.is_terminal() {
            return true;
        }
        let abandoned_after = chrono::Duration::from_std(self.config.retention_abandoned)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        if now - job.created_at <= abandoned_after {
            return false;
        }

        // A processing job with a live lease is not abandoned, no
        // matter how old it is.
        let lease_alive = job.status == JobStatus::Processing
            && job
                .last_pickup_at
                .is_some_and(|t| now - t < chrono::Duration::hours(1));
        !lease_alive
    }

    /// Delete one job's blobs, artifact rows, then the job row.
    /// Returns `true` when everything was removed.
    async fn reap_job(&self, job_id: &JobId) -> bool {
        let artifacts = match self.store.list_for_job(job_id).await {
            Ok(a) => a,
            Err(e) => {
                warn!(job_id = %job_id, "Reaper failed to list artifacts: {}", e);
                return false;
            }
        };

        for artifact in &artifacts {
            // Blob first; the row only goes once the blob is gone.
            if let Err(e) = self.store.delete(artifact).await {
                warn!(
                    job_id = %job_id,
                    name = %artifact.name,
                    "Blob deletion failed, job stays for the next cycle: {}",
                    e
                );
                return false;
            }
        }

        if let Err(e) = self.jobs.delete(job_id).await {
            warn!(job_id = %job_id, "Failed to delete job row: {}", e);
            return false;
        }

        debug!(job_id = %job_id, artifacts = artifacts.len(), "Reaped job");
        true
    }
}

//! Job row repository with guarded status transitions.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::{debug, warn};

use reel_models::{ArtifactId, Job, JobError, JobId, JobStatus};

use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};

/// Attempts before a value-CAS loop gives up with `Conflict`.
const CAS_MAX_ATTEMPTS: u32 = 5;

/// Server-side check-and-set on the serialized job row.
///
/// KEYS: job row, processing set, deadlines zset
/// ARGV: expected JSON, new JSON, job id, processing flag, deadline score
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if ARGV[4] == '1' then
  redis.call('SADD', KEYS[2], ARGV[3])
else
  redis.call('SREM', KEYS[2], ARGV[3])
end
if ARGV[5] ~= '' then
  redis.call('ZADD', KEYS[3], ARGV[5], ARGV[3])
end
return 1
"#;

/// Repository for `Job` rows.
#[derive(Clone)]
pub struct JobRepository {
    client: RegistryClient,
}

impl JobRepository {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Persist a freshly created job. Fails if the row already exists.
    pub async fn create(&self, job: &Job) -> RegistryResult<()> {
        let mut conn = self.client.conn().await?;
        let key = self.client.job_key(&job.id);
        let payload = serde_json::to_string(job)?;

        let stored: bool = conn.set_nx(&key, &payload).await?;
        if !stored {
            return Err(RegistryError::already_exists(key));
        }

        let _: () = conn
            .zadd(
                self.client.deadlines_key(),
                job.id.as_str(),
                job.retention_deadline.timestamp(),
            )
            .await?;

        debug!(job_id = %job.id, "Created job row");
        Ok(())
    }

    /// Load a job row.
    pub async fn get(&self, job_id: &JobId) -> RegistryResult<Job> {
        self.try_get(job_id)
            .await?
            .ok_or_else(|| RegistryError::not_found(self.client.job_key(job_id)))
    }

    /// Load a job row if it exists.
    pub async fn try_get(&self, job_id: &JobId) -> RegistryResult<Option<Job>> {
        let mut conn = self.client.conn().await?;
        let payload: Option<String> = conn.get(self.client.job_key(job_id)).await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Delete a job row and its index entries.
    ///
    /// Only the reaper calls this, after the job's artifacts are gone.
    pub async fn delete(&self, job_id: &JobId) -> RegistryResult<()> {
        let mut conn = self.client.conn().await?;
        let _: () = conn.del(self.client.job_key(job_id)).await?;
        let _: () = conn
            .zrem(self.client.deadlines_key(), job_id.as_str())
            .await?;
        let _: () = conn
            .srem(self.client.processing_key(), job_id.as_str())
            .await?;
        debug!(job_id = %job_id, "Deleted job row");
        Ok(())
    }

    /// Worker pickup: guarded `PENDING|UPLOADING|PROCESSING -> PROCESSING`
    /// that also increments the attempt counter and stamps the lease.
    ///
    /// A `PROCESSING` job whose lease is younger than `lease_timeout`
    /// is still owned by a live worker; re-entry is rejected so a
    /// duplicate delivery can never run the pipeline twice or burn an
    /// attempt. A released (`None`) or expired lease passes.
    pub async fn begin_attempt(
        &self,
        job_id: &JobId,
        lease_timeout: chrono::Duration,
    ) -> RegistryResult<Job> {
        self.update_guarded(
            job_id,
            move |job| {
                guard_transition(job, JobStatus::Processing)?;
                if job.status == JobStatus::Processing {
                    let lease_live = job
                        .last_pickup_at
                        .is_some_and(|t| Utc::now() - t <= lease_timeout);
                    if lease_live {
                        return Err(RegistryError::TransitionRejected {
                            job_id: job.id.to_string(),
                            from: job.status,
                            to: JobStatus::Processing,
                        });
                    }
                }
                Ok(())
            },
            |job| {
                job.status = JobStatus::Processing;
                job.attempt_count += 1;
                job.last_pickup_at = Some(Utc::now());
                job.updated_at = Utc::now();
            },
        )
        .await
    }

    /// Terminal success: sets the output artifact in the same write.
    pub async fn complete(
        &self,
        job_id: &JobId,
        output_artifact_id: ArtifactId,
        retention_deadline: DateTime<Utc>,
    ) -> RegistryResult<Job> {
        self.update_guarded(
            job_id,
            |job| guard_transition(job, JobStatus::Completed),
            move |job| {
                let now = Utc::now();
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.current_step = Some("complete".to_string());
                job.output_artifact_id = Some(output_artifact_id.clone());
                job.completed_at = Some(now);
                job.updated_at = now;
                job.retention_deadline = retention_deadline;
            },
        )
        .await
    }

    /// Terminal failure: persists the structured error in the same write.
    pub async fn fail(
        &self,
        job_id: &JobId,
        error: JobError,
        retention_deadline: DateTime<Utc>,
    ) -> RegistryResult<Job> {
        self.update_guarded(
            job_id,
            |job| guard_transition(job, JobStatus::Failed),
            move |job| {
                let now = Utc::now();
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
                job.completed_at = Some(now);
                job.updated_at = now;
                job.retention_deadline = retention_deadline;
            },
        )
        .await
    }

    /// User cancellation. Idempotent: returns `true` when this call
    /// performed the transition, `false` when the job was already
    /// cancelled. Rejects cancellation of completed or failed jobs.
    pub async fn cancel(
        &self,
        job_id: &JobId,
        retention_deadline: DateTime<Utc>,
    ) -> RegistryResult<bool> {
        let current = self.get(job_id).await?;
        if current.status == JobStatus::Cancelled {
            return Ok(false);
        }

        self.update_guarded(
            job_id,
            |job| guard_transition(job, JobStatus::Cancelled),
            move |job| {
                let now = Utc::now();
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(now);
                job.updated_at = now;
                job.retention_deadline = retention_deadline;
            },
        )
        .await?;

        Ok(true)
    }

    /// Release the worker lease without leaving `PROCESSING`.
    ///
    /// Called before a NACK so the delayed redelivery is immediately
    /// treated as a stale pickup instead of waiting out the
    /// visibility timeout.
    pub async fn release_lease(&self, job_id: &JobId) -> RegistryResult<Job> {
        self.update_guarded(
            job_id,
            |job| {
                if job.status == JobStatus::Processing {
                    Ok(())
                } else {
                    Err(RegistryError::TransitionRejected {
                        job_id: job.id.to_string(),
                        from: job.status,
                        to: JobStatus::Processing,
                    })
                }
            },
            |job| {
                job.last_pickup_at = None;
                job.updated_at = Utc::now();
            },
        )
        .await
    }

    /// Monotonic progress write: the stored percent never decreases.
    /// Returns the job as stored after the write.
    pub async fn update_progress(
        &self,
        job_id: &JobId,
        percent: u8,
        step: &str,
    ) -> RegistryResult<Job> {
        let step = step.to_string();
        self.update_guarded(
            job_id,
            |job| {
                if job.status.is_terminal() {
                    return Err(RegistryError::TransitionRejected {
                        job_id: job.id.to_string(),
                        from: job.status,
                        to: job.status,
                    });
                }
                Ok(())
            },
            move |job| {
                if percent > job.progress {
                    job.progress = percent.min(100);
                }
                job.current_step = Some(step.clone());
                job.updated_at = Utc::now();
            },
        )
        .await
    }

    /// Job IDs whose retention deadline has passed.
    pub async fn due_for_reaping(&self, now: DateTime<Utc>, limit: usize) -> RegistryResult<Vec<JobId>> {
        let mut conn = self.client.conn().await?;
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.client.deadlines_key())
            .arg("-inf")
            .arg(now.timestamp())
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(ids.into_iter().map(JobId::from_string).collect())
    }

    /// Job IDs currently marked `PROCESSING`.
    pub async fn processing_jobs(&self) -> RegistryResult<Vec<JobId>> {
        let mut conn = self.client.conn().await?;
        let ids: Vec<String> = conn.smembers(self.client.processing_key()).await?;
        Ok(ids.into_iter().map(JobId::from_string).collect())
    }

    /// Read-modify-write with a server-side check-and-set.
    ///
    /// `guard` inspects the freshly loaded row and may reject the
    /// update; `mutate` is applied to a copy which replaces the row
    /// only if nobody wrote in between. Retries a bounded number of
    /// times on contention.
    async fn update_guarded<G, M>(
        &self,
        job_id: &JobId,
        guard: G,
        mut mutate: M,
    ) -> RegistryResult<Job>
    where
        G: Fn(&Job) -> RegistryResult<()>,
        M: FnMut(&mut Job),
    {
        let key = self.client.job_key(job_id);
        let script = redis::Script::new(CAS_SCRIPT);

        for attempt in 0..CAS_MAX_ATTEMPTS {
            let mut conn = self.client.conn().await?;
            let current_raw: Option<String> = conn.get(&key).await?;
            let current_raw = current_raw.ok_or_else(|| RegistryError::not_found(&key))?;
            let current: Job = serde_json::from_str(&current_raw)?;

            guard(&current)?;

            let mut next = current.clone();
            mutate(&mut next);
            let next_raw = serde_json::to_string(&next)?;

            let deadline_score = if next.retention_deadline != current.retention_deadline {
                next.retention_deadline.timestamp().to_string()
            } else {
                String::new()
            };

            let swapped: i32 = script
                .key(&key)
                .key(self.client.processing_key())
                .key(self.client.deadlines_key())
                .arg(&current_raw)
                .arg(&next_raw)
                .arg(job_id.as_str())
                .arg(if next.status == JobStatus::Processing { "1" } else { "0" })
                .arg(&deadline_score)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(next);
            }

            warn!(
                job_id = %job_id,
                attempt = attempt + 1,
                "Job row changed under CAS, retrying"
            );
        }

        Err(RegistryError::Conflict(key))
    }
}

/// Guard closure body for a status transition against the central table.
fn guard_transition(job: &Job, to: JobStatus) -> RegistryResult<()> {
    if job.status.can_transition(to) {
        Ok(())
    } else {
        Err(RegistryError::TransitionRejected {
            job_id: job.id.to_string(),
            from: job.status,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{AudioWindow, Style};

    fn sample_job() -> Job {
        Job::new(
            Style::ModernMinimal,
            vec!["clip_0".into()],
            "track",
            AudioWindow::new(0.0, 30.0),
            Utc::now() + chrono::Duration::hours(24),
        )
    }

    #[test]
    fn test_guard_transition_table() {
        let mut job = sample_job();
        assert!(guard_transition(&job, JobStatus::Processing).is_ok());
        assert!(guard_transition(&job, JobStatus::Cancelled).is_ok());

        job.status = JobStatus::Completed;
        let err = guard_transition(&job, JobStatus::Processing).unwrap_err();
        assert!(matches!(err, RegistryError::TransitionRejected { .. }));
    }
}

//! Worker loop: pickup, pipeline execution, retry policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reel_models::{ErrorKind, Job, JobId, JobStatus};
use reel_queue::{JobQueue, ProgressChannel, StartMessage};
use reel_registry::{JobRepository, RegistryError};
use reel_storage::ArtifactStore;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::pipeline::{PipelineExecutor, PipelineFailure};
use crate::progress::ProgressPublisher;
use crate::stage::StageRunner;

/// How long a broker read blocks before the loop re-checks shutdown.
const CONSUME_BLOCK_MS: u64 = 1000;
/// How often expired (visibility-timed-out) messages are claimed.
const CLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// Long-lived job worker.
///
/// Workers are stateless and horizontally scalable: correctness rests
/// on the registry's guarded status transitions, not on worker
/// coordination.
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    jobs: JobRepository,
    store: ArtifactStore,
    channel: Arc<ProgressChannel>,
    consumer_name: String,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        queue: JobQueue,
        jobs: JobRepository,
        store: ArtifactStore,
        channel: ProgressChannel,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            config,
            queue: Arc::new(queue),
            jobs,
            store,
            channel: Arc::new(channel),
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            job_semaphore,
            shutdown,
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run the pickup loop until shutdown.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting worker '{}' ({} concurrent jobs, {} stage bodies per job)",
            self.consumer_name, self.config.max_concurrent_jobs, self.config.clip_parallel
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut claim_tick = tokio::time::interval(CLAIM_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping worker");
                        break;
                    }
                }
                _ = claim_tick.tick() => {
                    match self.queue.claim_expired(&self.consumer_name, 5).await {
                        Ok(claimed) if !claimed.is_empty() => {
                            info!("Claimed {} expired messages", claimed.len());
                            for (message_id, message) in claimed {
                                self.dispatch(message_id, message).await;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to claim expired messages: {}", e),
                    }
                }
                result = self.consume_batch() => {
                    if let Err(e) = result {
                        error!("Error consuming messages: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to finish");
        let _ = tokio::time::timeout(Duration::from_secs(60), self.wait_for_jobs()).await;
        info!("Worker stopped");
        Ok(())
    }

    async fn consume_batch(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let messages = self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, available.min(5))
            .await?;

        for (message_id, message) in messages {
            self.dispatch(message_id, message).await;
        }
        Ok(())
    }

    async fn dispatch(&self, message_id: String, message: StartMessage) {
        let Ok(permit) = self.job_semaphore.clone().acquire_owned().await else {
            return;
        };

        let context = JobContext {
            config: self.config.clone(),
            queue: Arc::clone(&self.queue),
            jobs: self.jobs.clone(),
            store: self.store.clone(),
            channel: Arc::clone(&self.channel),
        };

        tokio::spawn(async move {
            let _permit = permit;
            context.execute(message_id, message).await;
        });
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Everything one job execution needs, detached from the worker loop.
struct JobContext {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    jobs: JobRepository,
    store: ArtifactStore,
    channel: Arc<ProgressChannel>,
}

impl JobContext {
    async fn execute(&self, message_id: String, message: StartMessage) {
        let job_id = message.job_id.clone();

        let job = match self.jobs.try_get(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Message for unknown job, acking");
                self.ack(&message_id).await;
                return;
            }
            Err(e) => {
                // Registry unreachable: leave the message pending so it
                // is redelivered after the visibility timeout.
                error!(job_id = %job_id, "Failed to load job: {}", e);
                return;
            }
        };

        if !self.eligible(&job) {
            debug!(job_id = %job_id, status = %job.status, "Job not eligible for pickup, acking");
            self.ack(&message_id).await;
            return;
        }

        // Guarded pickup: losing the CAS, or finding the job leased
        // by a live worker, means this delivery is a duplicate.
        let lease_timeout = chrono::Duration::from_std(self.queue.visibility_timeout())
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let job = match self.jobs.begin_attempt(&job_id, lease_timeout).await {
            Ok(job) => job,
            Err(RegistryError::TransitionRejected { .. }) => {
                debug!(job_id = %job_id, "Job already owned or terminal, acking");
                self.ack(&message_id).await;
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, "Pickup failed: {}", e);
                return;
            }
        };

        info!(
            job_id = %job_id,
            attempt = job.attempt_count,
            "Picked up job"
        );

        let runner = Arc::new(StageRunner::new(
            job.clone(),
            self.store.clone(),
            self.config.clone(),
        ));
        let progress = Arc::new(ProgressPublisher::new(
            job_id.clone(),
            self.jobs.clone(),
            Arc::clone(&self.channel),
        ));
        progress.log(format!("Attempt {} started", job.attempt_count)).await;

        let executor = PipelineExecutor::new(
            Arc::clone(&runner),
            self.jobs.clone(),
            progress,
            self.config.clip_parallel,
        );

        let result = executor.run().await;
        runner.cleanup_scratch().await;

        match result {
            Ok(output_id) => {
                let deadline = Utc::now()
                    + chrono::Duration::from_std(self.config.retention_terminal)
                        .unwrap_or_else(|_| chrono::Duration::hours(1));
                match self.jobs.complete(&job_id, output_id.clone(), deadline).await {
                    Ok(_) => {
                        info!(job_id = %job_id, "Job completed");
                        self.channel.done(&job_id, output_id.as_str()).await.ok();
                    }
                    Err(e) => error!(job_id = %job_id, "Failed to mark job complete: {}", e),
                }
                self.ack(&message_id).await;
            }
            Err(failure) => {
                self.handle_failure(&message_id, &message, &job, failure)
                    .await;
            }
        }
    }

    async fn handle_failure(
        &self,
        message_id: &str,
        message: &StartMessage,
        job: &Job,
        failure: PipelineFailure,
    ) {
        let job_id = &job.id;
        let error = failure.error;

        if error.kind == ErrorKind::Cancelled {
            info!(job_id = %job_id, "Job cancelled, cleaning partial artifacts");
            self.delete_partial_artifacts(job_id, &failure.incomplete_stages)
                .await;
            self.ack(message_id).await;
            return;
        }

        let can_retry = error.retryable && job.attempt_count < self.config.max_attempts;

        if can_retry {
            let delay = self.config.backoff_for_attempt(job.attempt_count);
            info!(
                job_id = %job_id,
                attempt = job.attempt_count,
                delay_secs = delay.as_secs(),
                "Retryable failure, NACKing with backoff: {}",
                error
            );

            // Release the lease so the redelivery counts as stale.
            if let Err(e) = self.jobs.release_lease(job_id).await {
                warn!(job_id = %job_id, "Failed to release lease: {}", e);
            }
            if let Err(e) = self.queue.nack_with_delay(message_id, message, delay).await {
                error!(job_id = %job_id, "NACK failed: {}", e);
            }
            return;
        }

        warn!(
            job_id = %job_id,
            attempt = job.attempt_count,
            kind = error.kind.as_str(),
            "Terminal failure: {}",
            error
        );

        let deadline = Utc::now()
            + chrono::Duration::from_std(self.config.retention_terminal)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let message_text = error.to_string();

        match self.jobs.fail(job_id, error, deadline).await {
            Ok(_) => {
                self.channel.error(job_id, message_text).await.ok();
            }
            Err(RegistryError::TransitionRejected { .. }) => {
                // Already terminal (e.g. cancelled in parallel); fine.
            }
            Err(e) => error!(job_id = %job_id, "Failed to mark job failed: {}", e),
        }
        self.ack(message_id).await;
    }

    /// Pickup filter: pending jobs, or processing jobs whose lease
    /// looks dead.
    fn eligible(&self, job: &Job) -> bool {
        match job.status {
            JobStatus::Pending => true,
            JobStatus::Processing => {
                let visibility = chrono::Duration::from_std(self.queue.visibility_timeout())
                    .unwrap_or_else(|_| chrono::Duration::minutes(15));
                job.last_pickup_at
                    .map_or(true, |t| Utc::now() - t > visibility)
            }
            _ => false,
        }
    }

    /// Delete artifacts produced by stages that never completed.
    async fn delete_partial_artifacts(&self, job_id: &JobId, stages: &[&'static str]) {
        for &stage in stages {
            match self.store.list_for_stage(job_id, stage).await {
                Ok(artifacts) => {
                    for artifact in artifacts {
                        if let Err(e) = self.store.delete(&artifact).await {
                            warn!(
                                job_id = %job_id,
                                stage,
                                name = %artifact.name,
                                "Failed to delete partial artifact: {}",
                                e
                            );
                        }
                    }
                }
                Err(e) => warn!(job_id = %job_id, stage, "Failed to list artifacts: {}", e),
            }
        }
    }

    async fn ack(&self, message_id: &str) {
        if let Err(e) = self.queue.ack(message_id).await {
            error!("Failed to ack message {}: {}", message_id, e);
        }
    }
}

//! Scheduler: periodic reaping, delayed-message promotion, and
//! rescue of jobs abandoned by dead workers.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use reel_models::JobStatus;
use reel_queue::{JobQueue, StartMessage};
use reel_registry::JobRepository;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::reaper::RetentionReaper;

/// Periodic maintenance alongside the worker loop.
///
/// Every rescue tick it promotes due delayed messages and re-enqueues
/// `PROCESSING` jobs whose lease is older than the visibility timeout
/// plus slack; the pickup CAS guarantees at most one worker acts on a
/// rescued job. Every reaper tick it runs a retention pass.
pub struct Scheduler {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    jobs: JobRepository,
    reaper: RetentionReaper,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        jobs: JobRepository,
        reaper: RetentionReaper,
    ) -> Self {
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            config,
            queue,
            jobs,
            reaper,
            shutdown,
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run until shutdown.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting scheduler (rescue every {:?}, reap every {:?})",
            self.config.rescue_interval, self.config.reaper_interval
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut rescue_tick = tokio::time::interval(self.config.rescue_interval);
        let mut reap_tick = tokio::time::interval(self.config.reaper_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping scheduler");
                        break;
                    }
                }
                _ = rescue_tick.tick() => {
                    if let Err(e) = self.queue.promote_due().await {
                        warn!("Failed to promote delayed messages: {}", e);
                    }
                    if let Err(e) = self.rescue_abandoned().await {
                        error!("Abandoned-job rescue failed: {}", e);
                    }
                }
                _ = reap_tick.tick() => {
                    if let Err(e) = self.reaper.run_once().await {
                        error!("Reaper pass failed: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Re-enqueue processing jobs whose worker lease looks dead.
    async fn rescue_abandoned(&self) -> WorkerResult<usize> {
        let visibility = chrono::Duration::from_std(self.queue.visibility_timeout())
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let slack = chrono::Duration::from_std(self.config.lease_slack)
            .unwrap_or_else(|_| chrono::Duration::minutes(2));
        let dead_after = visibility + slack;
        let now = Utc::now();

        let mut rescued = 0;
        for job_id in self.jobs.processing_jobs().await? {
            let Some(job) = self.jobs.try_get(&job_id).await? else {
                continue;
            };
            if job.status != JobStatus::Processing {
                continue;
            }

            // A missing lease is a deliberate release before a NACK,
            // with a delayed redelivery already parked; re-enqueueing
            // it here would defeat the retry backoff. Only a lease
            // that was taken and never refreshed marks a dead worker.
            let lease_dead = job
                .last_pickup_at
                .map_or(false, |t| now - t > dead_after);
            if !lease_dead {
                continue;
            }

            warn!(
                job_id = %job_id,
                last_pickup_at = ?job.last_pickup_at,
                "Re-enqueueing job abandoned by a dead worker"
            );
            self.queue.enqueue(&StartMessage::new(job_id)).await?;
            rescued += 1;
        }

        if rescued > 0 {
            info!("Rescued {} abandoned jobs", rescued);
        }
        Ok(rescued)
    }
}

//! Reel rendering worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_queue::{JobQueue, ProgressChannel};
use reel_registry::{ArtifactRepository, JobRepository, RegistryClient};
use reel_storage::{ArtifactStore, BlobClient};
use reel_worker::{RetentionReaper, Scheduler, Worker, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reel=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let registry = match RegistryClient::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create registry client: {}", e);
            std::process::exit(1);
        }
    };
    let jobs = JobRepository::new(registry.clone());
    let artifact_rows = ArtifactRepository::new(registry);

    let blobs = match BlobClient::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create blob client: {}", e);
            std::process::exit(1);
        }
    };
    let store = ArtifactStore::new(blobs, jobs.clone(), artifact_rows);

    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    let scheduler_queue = match JobQueue::from_env() {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create scheduler queue client: {}", e);
            std::process::exit(1);
        }
    };

    let channel = match ProgressChannel::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create progress channel: {}", e);
            std::process::exit(1);
        }
    };

    let worker = Arc::new(Worker::new(
        config.clone(),
        queue,
        jobs.clone(),
        store.clone(),
        channel,
    ));
    let reaper = RetentionReaper::new(jobs.clone(), store, config.clone());
    let scheduler = Arc::new(Scheduler::new(config, scheduler_queue, jobs, reaper));

    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                error!("Scheduler error: {}", e);
            }
        })
    };

    let worker_handle = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                error!("Worker error: {}", e);
            }
        })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    worker.shutdown();
    scheduler.shutdown();
    worker_handle.await.ok();
    scheduler_handle.await.ok();

    info!("Worker shutdown complete");
}

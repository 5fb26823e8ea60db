//! Registry integration tests.

use chrono::Utc;

use reel_models::{ArtifactId, AudioWindow, ErrorKind, Job, JobError, JobStatus, Style};
use reel_registry::{JobRepository, RegistryClient, RegistryConfig};

fn sample_job() -> Job {
    Job::new(
        Style::EnergeticDance,
        vec!["clip_0".into(), "clip_1".into(), "clip_2".into()],
        "track",
        AudioWindow::new(12.0, 42.0),
        Utc::now() + chrono::Duration::hours(24),
    )
}

fn repo() -> JobRepository {
    let client = RegistryClient::new(RegistryConfig::from_env()).expect("redis client");
    JobRepository::new(client)
}

fn lease_timeout() -> chrono::Duration {
    chrono::Duration::minutes(15)
}

/// Pickup CAS: one worker wins; a live lease rejects duplicates;
/// re-entry works once the lease is released.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_pickup_lease_and_reentry() {
    let repo = repo();
    let job = sample_job();
    repo.create(&job).await.unwrap();

    let picked = repo.begin_attempt(&job.id, lease_timeout()).await.unwrap();
    assert_eq!(picked.status, JobStatus::Processing);
    assert_eq!(picked.attempt_count, 1);
    assert!(picked.last_pickup_at.is_some());

    // A duplicate delivery while the lease is live must not burn an
    // attempt or run the pipeline twice.
    let err = repo.begin_attempt(&job.id, lease_timeout()).await.unwrap_err();
    assert!(matches!(
        err,
        reel_registry::RegistryError::TransitionRejected { .. }
    ));

    // After a NACK releases the lease, the redelivery re-enters.
    repo.release_lease(&job.id).await.unwrap();
    let repicked = repo.begin_attempt(&job.id, lease_timeout()).await.unwrap();
    assert_eq!(repicked.attempt_count, 2);

    repo.delete(&job.id).await.unwrap();
}

/// Terminal statuses are absorbing: completing twice is rejected.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_terminal_absorbing() {
    let repo = repo();
    let job = sample_job();
    repo.create(&job).await.unwrap();

    repo.begin_attempt(&job.id, lease_timeout()).await.unwrap();
    let done = repo
        .complete(
            &job.id,
            ArtifactId::from_string("out"),
            Utc::now() + chrono::Duration::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);

    let err = repo.begin_attempt(&job.id, lease_timeout()).await.unwrap_err();
    assert!(matches!(
        err,
        reel_registry::RegistryError::TransitionRejected { .. }
    ));

    repo.delete(&job.id).await.unwrap();
}

/// Concurrent cancels are idempotent: exactly one observes the edge.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cancel_idempotent() {
    let repo = repo();
    let job = sample_job();
    repo.create(&job).await.unwrap();

    let deadline = Utc::now() + chrono::Duration::hours(1);
    let first = repo.cancel(&job.id, deadline).await.unwrap();
    let second = repo.cancel(&job.id, deadline).await.unwrap();
    assert!(first);
    assert!(!second);

    repo.delete(&job.id).await.unwrap();
}

/// Progress writes are monotonic.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_monotonic() {
    let repo = repo();
    let job = sample_job();
    repo.create(&job).await.unwrap();
    repo.begin_attempt(&job.id, lease_timeout()).await.unwrap();

    let j = repo.update_progress(&job.id, 40, "normalize").await.unwrap();
    assert_eq!(j.progress, 40);

    // A lower percent never moves the row backwards.
    let j = repo.update_progress(&job.id, 20, "normalize").await.unwrap();
    assert_eq!(j.progress, 40);

    let j = repo.update_progress(&job.id, 55, "cut_and_concat").await.unwrap();
    assert_eq!(j.progress, 55);
    assert_eq!(j.current_step.as_deref(), Some("cut_and_concat"));

    repo.delete(&job.id).await.unwrap();
}

/// Failed jobs persist the structured error.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_fail_persists_error() {
    let repo = repo();
    let job = sample_job();
    repo.create(&job).await.unwrap();
    repo.begin_attempt(&job.id, lease_timeout()).await.unwrap();

    let error = JobError::new(ErrorKind::FatalTool, Some("normalize"), "exit status 1");
    let failed = repo
        .fail(&job.id, error, Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    let stored = failed.error.unwrap();
    assert_eq!(stored.kind, ErrorKind::FatalTool);
    assert_eq!(stored.stage.as_deref(), Some("normalize"));
    assert!(!stored.retryable);

    repo.delete(&job.id).await.unwrap();
}

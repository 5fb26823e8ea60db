//! Pipeline executor: topological execution of the stage graph.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use reel_models::{ArtifactId, ErrorKind, JobError, JobStatus};
use reel_registry::JobRepository;

use crate::progress::ProgressPublisher;
use crate::stage::StageRunner;

/// A node in the stage graph. `Normalize` fans out per input clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    AudioSlice,
    Beats,
    Plan,
    Normalize(usize),
    CutAndConcat,
    StyleGrade,
    Mux,
    QualityGate,
}

impl StageName {
    /// Stage name as used for artifact addressing and `error.stage`.
    pub fn label(&self) -> &'static str {
        match self {
            StageName::AudioSlice => "audio_slice",
            StageName::Beats => "beats",
            StageName::Plan => "plan",
            StageName::Normalize(_) => "normalize",
            StageName::CutAndConcat => "cut_and_concat",
            StageName::StyleGrade => "style_grade",
            StageName::Mux => "mux",
            StageName::QualityGate => "quality_gate",
        }
    }

    /// Share of the job's progress attributed to this stage, with the
    /// normalize share split across the fan-out.
    fn weight(&self, clip_count: usize) -> f64 {
        match self {
            StageName::AudioSlice => 10.0,
            StageName::Beats => 10.0,
            StageName::Plan => 5.0,
            StageName::Normalize(_) => 25.0 / clip_count.max(1) as f64,
            StageName::CutAndConcat => 20.0,
            StageName::StyleGrade => 10.0,
            StageName::Mux => 10.0,
            StageName::QualityGate => 10.0,
        }
    }

    /// All stages for a job with `clip_count` input clips.
    pub fn all(clip_count: usize) -> Vec<StageName> {
        let mut stages = vec![StageName::AudioSlice, StageName::Beats, StageName::Plan];
        stages.extend((0..clip_count).map(StageName::Normalize));
        stages.extend([
            StageName::CutAndConcat,
            StageName::StyleGrade,
            StageName::Mux,
            StageName::QualityGate,
        ]);
        stages
    }

    /// Direct prerequisites of this stage.
    pub fn prerequisites(&self, clip_count: usize) -> Vec<StageName> {
        match self {
            StageName::AudioSlice => vec![],
            StageName::Beats => vec![StageName::AudioSlice],
            StageName::Plan => vec![StageName::Beats],
            StageName::Normalize(_) => vec![StageName::AudioSlice],
            StageName::CutAndConcat => {
                let mut deps = vec![StageName::Plan];
                deps.extend((0..clip_count).map(StageName::Normalize));
                deps
            }
            StageName::StyleGrade => vec![StageName::CutAndConcat],
            StageName::Mux => vec![StageName::StyleGrade, StageName::AudioSlice],
            StageName::QualityGate => vec![StageName::Mux],
        }
    }
}

/// A failed pipeline run: the error to persist plus the stages that
/// had started without completing when the run stopped (their partial
/// artifacts are the cancellation cleanup set).
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: JobError,
    pub incomplete_stages: Vec<&'static str>,
}

impl PipelineFailure {
    fn new(error: JobError, incomplete: &HashSet<StageName>) -> Self {
        let mut incomplete_stages: Vec<&'static str> =
            incomplete.iter().map(|s| s.label()).collect();
        incomplete_stages.sort_unstable();
        incomplete_stages.dedup();
        Self {
            error,
            incomplete_stages,
        }
    }
}

/// Drives one job through the stage graph.
///
/// Ready stages are dispatched onto a bounded per-job pool; between
/// completions the job row is checked for cancellation, so a
/// `Cancel` takes effect at the next stage boundary. The first
/// failure in wall-clock completion order wins; running peers are
/// aborted and reported as `stage_cancelled`, not as failures.
pub struct PipelineExecutor {
    runner: Arc<StageRunner>,
    jobs: JobRepository,
    progress: Arc<ProgressPublisher>,
    clip_parallel: usize,
}

impl PipelineExecutor {
    pub fn new(
        runner: Arc<StageRunner>,
        jobs: JobRepository,
        progress: Arc<ProgressPublisher>,
        clip_parallel: usize,
    ) -> Self {
        Self {
            runner,
            jobs,
            progress,
            clip_parallel: clip_parallel.max(1),
        }
    }

    /// Run the whole graph. Returns the output artifact ID chosen by
    /// the quality gate.
    pub async fn run(&self) -> Result<ArtifactId, PipelineFailure> {
        let clip_count = self.runner.job().clip_count();
        let job_id = self.runner.job().id.clone();
        let stages = StageName::all(clip_count);

        let semaphore = Arc::new(Semaphore::new(self.clip_parallel));
        let mut completed: HashSet<StageName> = HashSet::new();
        let mut started: HashSet<StageName> = HashSet::new();
        let mut running: JoinSet<(StageName, Result<Option<ArtifactId>, JobError>)> =
            JoinSet::new();
        let mut percent_done = 0.0f64;
        let mut output: Option<ArtifactId> = None;

        let mut cancel_tick = tokio::time::interval(std::time::Duration::from_secs(2));
        cancel_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Cancellation is observed at stage boundaries and on a
            // short poll while stages run; aborted stage tasks take
            // their tool subprocesses down with them.
            if self.cancelled(&job_id).await {
                running.abort_all();
                let incomplete: HashSet<StageName> =
                    started.difference(&completed).copied().collect();
                info!(job_id = %job_id, "Cancellation observed, aborting remaining stages");
                return Err(PipelineFailure::new(
                    JobError::new(ErrorKind::Cancelled, None, "cancelled by user"),
                    &incomplete,
                ));
            }

            // Dispatch every stage whose prerequisites are done.
            for stage in &stages {
                if started.contains(stage) {
                    continue;
                }
                let ready = stage
                    .prerequisites(clip_count)
                    .iter()
                    .all(|dep| completed.contains(dep));
                if !ready {
                    continue;
                }

                started.insert(*stage);
                let runner = Arc::clone(&self.runner);
                let semaphore = Arc::clone(&semaphore);
                let stage = *stage;
                debug!(job_id = %job_id, stage = stage.label(), "Dispatching stage");

                running.spawn(async move {
                    // Pool slot is held for the stage body only
                    let _permit = semaphore.acquire_owned().await;
                    let result = runner.run(&stage).await;
                    (stage, result)
                });
            }

            if completed.len() == stages.len() {
                break;
            }

            let joined = tokio::select! {
                joined = running.join_next() => joined,
                _ = cancel_tick.tick() => continue,
            };

            let Some(joined) = joined else {
                // Nothing running and nothing completed the graph:
                // the dependency table is inconsistent.
                let incomplete: HashSet<StageName> =
                    started.difference(&completed).copied().collect();
                return Err(PipelineFailure::new(
                    JobError::new(
                        ErrorKind::FatalTool,
                        None,
                        "stage graph stalled with no runnable stage",
                    ),
                    &incomplete,
                ));
            };

            match joined {
                Ok((stage, Ok(stage_output))) => {
                    completed.insert(stage);
                    if let Some(id) = stage_output {
                        output = Some(id);
                    }

                    percent_done += stage.weight(clip_count);
                    self.progress
                        .publish(percent_done.round() as u8, stage.label())
                        .await
                        .ok();
                    info!(job_id = %job_id, stage = stage.label(), "Stage complete");
                }
                Ok((stage, Err(error))) => {
                    running.abort_all();
                    // Drain aborted peers so their labels are reported
                    let mut incomplete: HashSet<StageName> =
                        started.difference(&completed).copied().collect();
                    incomplete.insert(stage);
                    for peer in &incomplete {
                        if *peer != stage {
                            warn!(
                                job_id = %job_id,
                                stage = peer.label(),
                                "stage_cancelled: sibling aborted after first failure"
                            );
                        }
                    }
                    info!(job_id = %job_id, stage = stage.label(), error = %error, "Stage failed");
                    return Err(PipelineFailure::new(error, &incomplete));
                }
                Err(join_error) if join_error.is_cancelled() => continue,
                Err(join_error) => {
                    running.abort_all();
                    let incomplete: HashSet<StageName> =
                        started.difference(&completed).copied().collect();
                    return Err(PipelineFailure::new(
                        JobError::new(
                            ErrorKind::FatalTool,
                            None,
                            format!("stage task panicked: {join_error}"),
                        ),
                        &incomplete,
                    ));
                }
            }
        }

        let output = output.ok_or_else(|| {
            PipelineFailure::new(
                JobError::new(
                    ErrorKind::QualityGateFailed,
                    Some("quality_gate"),
                    "pipeline finished without an output artifact",
                ),
                &HashSet::new(),
            )
        })?;

        self.progress.publish(100, "complete").await.ok();
        Ok(output)
    }

    async fn cancelled(&self, job_id: &reel_models::JobId) -> bool {
        match self.jobs.try_get(job_id).await {
            Ok(Some(job)) => job.status == JobStatus::Cancelled,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_list_covers_fanout() {
        let stages = StageName::all(3);
        assert_eq!(stages.len(), 3 + 3 + 4);
        assert!(stages.contains(&StageName::Normalize(2)));
    }

    #[test]
    fn test_prerequisites_form_a_dag() {
        // Every prerequisite appears earlier in the stage list
        let clip_count = 4;
        let stages = StageName::all(clip_count);
        for (i, stage) in stages.iter().enumerate() {
            for dep in stage.prerequisites(clip_count) {
                let dep_index = stages.iter().position(|s| *s == dep).unwrap();
                assert!(dep_index < i, "{dep:?} must precede {stage:?}");
            }
        }
    }

    #[test]
    fn test_normalize_waits_only_for_audio_slice() {
        let deps = StageName::Normalize(1).prerequisites(3);
        assert_eq!(deps, vec![StageName::AudioSlice]);
    }

    #[test]
    fn test_concat_waits_for_plan_and_all_normalizes() {
        let deps = StageName::CutAndConcat.prerequisites(2);
        assert!(deps.contains(&StageName::Plan));
        assert!(deps.contains(&StageName::Normalize(0)));
        assert!(deps.contains(&StageName::Normalize(1)));
    }

    #[test]
    fn test_weights_sum_to_hundred() {
        for clip_count in 1..=5 {
            let total: f64 = StageName::all(clip_count)
                .iter()
                .map(|s| s.weight(clip_count))
                .sum();
            assert!((total - 100.0).abs() < 1e-9, "clip_count={clip_count}: {total}");
        }
    }
}

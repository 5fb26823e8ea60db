//! Stage runner: executes one named stage of the pipeline.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use reel_analysis::{BeatAnalyzer, CutPlanner};
use reel_media::{
    decode_check, probe_media, stages, MediaError, ToolInvoker,
};
use reel_models::{
    ArtifactId, BeatPlan, ContentKind, EncodingConfig, ErrorKind, Job, JobError, Segment,
    INPUT_STAGE, OUTPUT_HEIGHT, OUTPUT_WIDTH, REEL_DURATION_SEC,
};
use reel_storage::{ArtifactStore, StorageError};

use crate::config::WorkerConfig;
use crate::pipeline::StageName;

/// Artifact names produced by the pipeline.
pub const SLICED_AUDIO: &str = "sliced_audio";
pub const ANALYSIS_WAV: &str = "analysis_wav";
pub const BEAT_PLAN: &str = "beat_plan";
pub const SEGMENTS: &str = "segments";
pub const CONCATENATED: &str = "concatenated";
pub const GRADED: &str = "graded";
pub const MUXED: &str = "muxed";

/// Name of the normalized artifact for clip `i`.
pub fn normalized_name(index: usize) -> String {
    format!("normalized_{index}")
}

/// Allowed deviation of the final container duration, seconds.
const DURATION_TOLERANCE_SEC: f64 = 0.5;

/// Executes stage bodies for one job.
///
/// Inputs are downloaded on demand into the job's scratch directory;
/// outputs are written back through the artifact store under the
/// stage's name. Stage bodies never mutate their inputs.
pub struct StageRunner {
    job: Job,
    store: ArtifactStore,
    invoker: ToolInvoker,
    config: WorkerConfig,
    scratch: PathBuf,
    enc: EncodingConfig,
}

impl StageRunner {
    pub fn new(job: Job, store: ArtifactStore, config: WorkerConfig) -> Self {
        let scratch = Path::new(&config.work_dir).join(job.id.as_str());
        let invoker = ToolInvoker::new().with_grace(config.tool_grace);
        Self {
            job,
            store,
            invoker,
            config,
            scratch,
            enc: EncodingConfig::default(),
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    /// Run one stage. The quality gate returns the output artifact ID.
    pub async fn run(&self, stage: &StageName) -> Result<Option<ArtifactId>, JobError> {
        tokio::fs::create_dir_all(&self.scratch)
            .await
            .map_err(|e| JobError::new(ErrorKind::StorageUnavailable, Some(stage.label()), e.to_string()))?;

        // A redelivered job re-runs from its first incomplete stage:
        // anything that already produced its declared outputs is
        // skipped. The quality gate always re-runs because its result
        // is the verdict, not an artifact.
        if !matches!(stage, StageName::QualityGate) && self.outputs_exist(stage).await? {
            info!(
                job_id = %self.job.id,
                stage = stage.label(),
                "Outputs already present, skipping stage"
            );
            return Ok(None);
        }

        debug!(job_id = %self.job.id, stage = %stage.label(), "Running stage");

        match stage {
            StageName::AudioSlice => self.audio_slice().await.map(|_| None),
            StageName::Beats => self.beats().await.map(|_| None),
            StageName::Plan => self.plan().await.map(|_| None),
            StageName::Normalize(index) => self.normalize(*index).await.map(|_| None),
            StageName::CutAndConcat => self.cut_and_concat().await.map(|_| None),
            StageName::StyleGrade => self.style_grade().await.map(|_| None),
            StageName::Mux => self.mux().await.map(|_| None),
            StageName::QualityGate => self.quality_gate().await.map(Some),
        }
    }

    /// `audio_slice`: window slice re-encoded to uniform AAC, plus the
    /// mono analysis WAV.
    async fn audio_slice(&self) -> Result<(), JobError> {
        const STAGE: &str = "audio_slice";
        let timeout = self.config.stage_timeouts.audio_slice;

        let source = self
            .fetch(INPUT_STAGE, &self.job.audio_name, "source_audio", STAGE)
            .await?;

        // Window-vs-duration validation is deferred to here, the
        // first time the real file is decoded.
        let info = probe_media(&source)
            .await
            .map_err(|e| media_error(STAGE, e))?;
        if self.job.audio_window.end_sec > info.duration + 1e-3 {
            return Err(JobError::new(
                ErrorKind::InvalidInput,
                Some(STAGE),
                format!(
                    "audio window ends at {:.2}s but the track is {:.2}s long",
                    self.job.audio_window.end_sec, info.duration
                ),
            ));
        }

        let sliced = self.scratch.join("sliced_audio.m4a");
        let cmd = stages::slice_audio(&source, &sliced, &self.job.audio_window, &self.enc)
            .into_tool_command(timeout)
            .map_err(|e| media_error(STAGE, e))?;
        self.invoker
            .run_checked(&cmd)
            .await
            .map_err(|e| media_error(STAGE, e))?;

        let wav = self.scratch.join("analysis.wav");
        let cmd = stages::analysis_wav(&source, &wav, &self.job.audio_window)
            .into_tool_command(timeout)
            .map_err(|e| media_error(STAGE, e))?;
        self.invoker
            .run_checked(&cmd)
            .await
            .map_err(|e| media_error(STAGE, e))?;

        self.store_file(STAGE, SLICED_AUDIO, &sliced, ContentKind::Audio).await?;
        self.store_file(STAGE, ANALYSIS_WAV, &wav, ContentKind::Audio).await?;
        Ok(())
    }

    /// `beats`: run the beat analyzer over the analysis WAV.
    async fn beats(&self) -> Result<(), JobError> {
        const STAGE: &str = "beats";

        let wav = self.fetch(STAGE_AUDIO_SLICE, ANALYSIS_WAV, "analysis.wav", STAGE).await?;

        // Compute-bound; keep it off the async runtime threads.
        let plan = tokio::task::spawn_blocking(move || {
            BeatAnalyzer::default().analyze_file(&wav)
        })
        .await
        .map_err(|e| JobError::new(ErrorKind::AnalysisFailed, Some(STAGE), e.to_string()))?
        .map_err(|e| JobError::new(ErrorKind::AnalysisFailed, Some(STAGE), e.to_string()))?;

        plan.validate(REEL_DURATION_SEC)
            .map_err(|reason| JobError::new(ErrorKind::AnalysisFailed, Some(STAGE), reason))?;

        info!(
            job_id = %self.job.id,
            tempo = plan.tempo_bpm,
            beats = plan.beats.len(),
            "Beat analysis complete"
        );

        self.store_json(STAGE, BEAT_PLAN, &plan).await
    }

    /// `plan`: beat-aligned segment plan for the job's clips.
    async fn plan(&self) -> Result<(), JobError> {
        const STAGE: &str = "plan";

        let artifact = self.get_artifact(STAGE_BEATS, BEAT_PLAN, STAGE).await?;
        let beat_plan: BeatPlan = self
            .store
            .fetch_json(&artifact)
            .await
            .map_err(|e| storage_error(STAGE, e))?;

        let segments = CutPlanner::default()
            .plan(&beat_plan, &self.job.clip_names, self.job.style)
            .map_err(|e| JobError::new(ErrorKind::PlanInfeasible, Some(STAGE), e.to_string()))?;

        self.store_json(STAGE, SEGMENTS, &segments).await
    }

    /// `normalize` for clip `index`: target raster/rate, duration
    /// fitted to an equal share of the reel.
    async fn normalize(&self, index: usize) -> Result<(), JobError> {
        const STAGE: &str = "normalize";

        let clip_name = self.job.clip_names.get(index).cloned().ok_or_else(|| {
            JobError::new(
                ErrorKind::PlanInfeasible,
                Some(STAGE),
                format!("no input clip at index {index}"),
            )
        })?;

        let artifact = self.get_artifact(INPUT_STAGE, &clip_name, STAGE).await?;
        let local = self
            .fetch(INPUT_STAGE, &clip_name, &format!("source_clip_{index}"), STAGE)
            .await?;

        let target = REEL_DURATION_SEC / self.job.clip_count() as f64;
        let output = self.scratch.join(format!("normalized_{index}.mp4"));
        let timeout = self.config.stage_timeouts.normalize;

        let cmd = match artifact.content_kind {
            ContentKind::Image => stages::normalize_image(&local, &output, target, &self.enc),
            _ => {
                let info = probe_media(&local)
                    .await
                    .map_err(|e| media_error(STAGE, e))?;
                stages::normalize_video(&local, &output, info.duration, target, &self.enc)
                    .map_err(|e| media_error(STAGE, e))?
            }
        };

        let cmd = cmd.into_tool_command(timeout).map_err(|e| media_error(STAGE, e))?;
        self.invoker
            .run_checked(&cmd)
            .await
            .map_err(|e| media_error(STAGE, e))?;

        self.store_file(STAGE, &normalized_name(index), &output, ContentKind::Video)
            .await
    }

    /// `cut_and_concat`: one silent track from the normalized clips,
    /// honoring the planned boundaries and transitions.
    async fn cut_and_concat(&self) -> Result<(), JobError> {
        const STAGE: &str = "cut_and_concat";

        let artifact = self.get_artifact(STAGE_PLAN, SEGMENTS, STAGE).await?;
        let segments: Vec<Segment> = self
            .store
            .fetch_json(&artifact)
            .await
            .map_err(|e| storage_error(STAGE, e))?;

        let mut clips = Vec::with_capacity(segments.len());
        for segment in &segments {
            let local = self
                .fetch(
                    STAGE_NORMALIZE,
                    &normalized_name(segment.index),
                    &format!("normalized_{}.mp4", segment.index),
                    STAGE,
                )
                .await?;

            let duration = Segment::duration_sec(&segments, segment.index);
            let blend = if segment.transition_out.blends() {
                segment.transition_out.duration_sec()
            } else {
                0.0
            };
            clips.push(stages::ConcatClip {
                path: local,
                trim_in: segment.source_in_sec,
                trim_out: segment.source_out_sec,
                render_len: duration + blend,
            });
        }

        let transitions: Vec<_> = segments
            .iter()
            .take(segments.len().saturating_sub(1))
            .map(|s| s.transition_out)
            .collect();

        let output = self.scratch.join("concatenated.mp4");
        let cmd = stages::cut_and_concat(&clips, &transitions, &output, &self.enc)
            .map_err(|e| media_error(STAGE, e))?
            .into_tool_command(self.config.stage_timeouts.cut_and_concat)
            .map_err(|e| media_error(STAGE, e))?;
        self.invoker
            .run_checked(&cmd)
            .await
            .map_err(|e| media_error(STAGE, e))?;

        self.store_file(STAGE, CONCATENATED, &output, ContentKind::Video).await
    }

    /// `style_grade`: apply the style's color contract.
    async fn style_grade(&self) -> Result<(), JobError> {
        const STAGE: &str = "style_grade";

        let input = self
            .fetch(STAGE_CUT_AND_CONCAT, CONCATENATED, "concatenated.mp4", STAGE)
            .await?;
        let output = self.scratch.join("graded.mp4");

        let cmd = stages::style_grade(&input, &output, &self.job.style.color_grade(), &self.enc)
            .into_tool_command(self.config.stage_timeouts.style_grade)
            .map_err(|e| media_error(STAGE, e))?;
        self.invoker
            .run_checked(&cmd)
            .await
            .map_err(|e| media_error(STAGE, e))?;

        self.store_file(STAGE, GRADED, &output, ContentKind::Video).await
    }

    /// `mux`: final container with video and the sliced audio.
    async fn mux(&self) -> Result<(), JobError> {
        const STAGE: &str = "mux";

        let video = self
            .fetch(STAGE_STYLE_GRADE, GRADED, "graded.mp4", STAGE)
            .await?;
        let audio = self
            .fetch(STAGE_AUDIO_SLICE, SLICED_AUDIO, "sliced_audio.m4a", STAGE)
            .await?;
        let output = self.scratch.join("muxed.mp4");

        let cmd = stages::mux(&video, &audio, &output, &self.enc)
            .into_tool_command(self.config.stage_timeouts.mux)
            .map_err(|e| media_error(STAGE, e))?;
        self.invoker
            .run_checked(&cmd)
            .await
            .map_err(|e| media_error(STAGE, e))?;

        self.store_file(STAGE, MUXED, &output, ContentKind::Video).await
    }

    /// `quality_gate`: verify the container before declaring success.
    async fn quality_gate(&self) -> Result<ArtifactId, JobError> {
        const STAGE: &str = "quality_gate";
        let timeout = self.config.stage_timeouts.quality_gate;

        let artifact = self.get_artifact(STAGE_MUX, MUXED, STAGE).await?;
        let local = self.fetch(STAGE_MUX, MUXED, "muxed.mp4", STAGE).await?;

        let info = probe_media(&local).await.map_err(|e| media_error(STAGE, e))?;

        let gate_failed = |reason: String| {
            JobError::new(ErrorKind::QualityGateFailed, Some(STAGE), reason)
        };

        if (info.duration - REEL_DURATION_SEC).abs() > DURATION_TOLERANCE_SEC {
            return Err(gate_failed(format!(
                "duration {:.2}s outside {REEL_DURATION_SEC}±{DURATION_TOLERANCE_SEC}s",
                info.duration
            )));
        }
        if info.width != OUTPUT_WIDTH || info.height != OUTPUT_HEIGHT {
            return Err(gate_failed(format!(
                "resolution {}x{} is not {OUTPUT_WIDTH}x{OUTPUT_HEIGHT}",
                info.width, info.height
            )));
        }
        if info.video_streams != 1 || info.audio_streams != 1 {
            return Err(gate_failed(format!(
                "expected one video and one audio stream, found {}/{}",
                info.video_streams, info.audio_streams
            )));
        }

        decode_check(&local, timeout)
            .await
            .map_err(|e| gate_failed(format!("decode check failed: {e}")))?;

        info!(job_id = %self.job.id, "Quality gate passed");
        Ok(artifact.id)
    }

    /// Declared output names of a stage.
    pub fn declared_outputs(&self, stage: &StageName) -> Vec<String> {
        match stage {
            StageName::AudioSlice => vec![SLICED_AUDIO.to_string(), ANALYSIS_WAV.to_string()],
            StageName::Beats => vec![BEAT_PLAN.to_string()],
            StageName::Plan => vec![SEGMENTS.to_string()],
            StageName::Normalize(i) => vec![normalized_name(*i)],
            StageName::CutAndConcat => vec![CONCATENATED.to_string()],
            StageName::StyleGrade => vec![GRADED.to_string()],
            StageName::Mux => vec![MUXED.to_string()],
            StageName::QualityGate => vec![],
        }
    }

    async fn outputs_exist(&self, stage: &StageName) -> Result<bool, JobError> {
        for name in self.declared_outputs(stage) {
            let present = self
                .store
                .exists(&self.job.id, stage.label(), &name)
                .await
                .map_err(|e| storage_error(stage.label(), e))?;
            if !present {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Remove the job's scratch directory.
    pub async fn cleanup_scratch(&self) {
        if self.scratch.exists() {
            tokio::fs::remove_dir_all(&self.scratch).await.ok();
        }
    }

    async fn get_artifact(
        &self,
        stage: &str,
        name: &str,
        for_stage: &str,
    ) -> Result<reel_models::Artifact, JobError> {
        self.store
            .get(&self.job.id, stage, name)
            .await
            .map_err(|e| storage_error(for_stage, e))
    }

    /// Download an artifact into the scratch directory.
    async fn fetch(
        &self,
        stage: &str,
        name: &str,
        file_name: &str,
        for_stage: &str,
    ) -> Result<PathBuf, JobError> {
        let artifact = self.get_artifact(stage, name, for_stage).await?;
        let local = self.scratch.join(file_name);
        if !local.exists() {
            self.store
                .fetch_to_path(&artifact, &local)
                .await
                .map_err(|e| storage_error(for_stage, e))?;
        }
        Ok(local)
    }

    async fn store_file(
        &self,
        stage: &str,
        name: &str,
        path: &Path,
        kind: ContentKind,
    ) -> Result<(), JobError> {
        self.store
            .put_file(&self.job.id, stage, name, path, kind)
            .await
            .map_err(|e| storage_error(stage, e))?;
        Ok(())
    }

    async fn store_json<T: serde::Serialize>(
        &self,
        stage: &str,
        name: &str,
        value: &T,
    ) -> Result<(), JobError> {
        self.store
            .put_json(&self.job.id, stage, name, value)
            .await
            .map_err(|e| storage_error(stage, e))?;
        Ok(())
    }
}

// Stage name strings used for artifact addressing.
const STAGE_AUDIO_SLICE: &str = "audio_slice";
const STAGE_BEATS: &str = "beats";
const STAGE_PLAN: &str = "plan";
const STAGE_NORMALIZE: &str = "normalize";
const STAGE_CUT_AND_CONCAT: &str = "cut_and_concat";
const STAGE_STYLE_GRADE: &str = "style_grade";
const STAGE_MUX: &str = "mux";

/// Classify a media error into the persisted taxonomy.
fn media_error(stage: &str, error: MediaError) -> JobError {
    let kind = match &error {
        MediaError::Timeout(_) => ErrorKind::TransientTool,
        MediaError::Cancelled => ErrorKind::Cancelled,
        MediaError::Io(_) => ErrorKind::StorageUnavailable,
        e if e.is_transient() => ErrorKind::TransientTool,
        _ => ErrorKind::FatalTool,
    };
    JobError::new(kind, Some(stage), error.to_string())
}

/// Classify a storage error. A write refused because the job turned
/// terminal means cancellation was observed.
fn storage_error(stage: &str, error: StorageError) -> JobError {
    let kind = match &error {
        StorageError::JobUnwritable { reason, .. } if reason.contains("CANCELLED") => {
            ErrorKind::Cancelled
        }
        StorageError::NotFound(_) => ErrorKind::FatalTool,
        _ => ErrorKind::StorageUnavailable,
    };
    JobError::new(kind, Some(stage), error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_names() {
        assert_eq!(normalized_name(0), "normalized_0");
        assert_eq!(normalized_name(4), "normalized_4");
    }

    #[test]
    fn test_media_error_classification() {
        let e = media_error("normalize", MediaError::Timeout(180));
        assert_eq!(e.kind, ErrorKind::TransientTool);
        assert!(e.retryable);

        let e = media_error(
            "normalize",
            MediaError::tool_failed(Some(1), "Invalid data found when processing input"),
        );
        assert_eq!(e.kind, ErrorKind::FatalTool);
        assert!(!e.retryable);

        let e = media_error(
            "mux",
            MediaError::tool_failed(Some(1), "error: Connection reset by peer"),
        );
        assert_eq!(e.kind, ErrorKind::TransientTool);
    }

    #[test]
    fn test_storage_error_classification() {
        let e = storage_error(
            "mux",
            StorageError::JobUnwritable {
                job_id: "j".into(),
                reason: "job is CANCELLED".into(),
            },
        );
        assert_eq!(e.kind, ErrorKind::Cancelled);

        let e = storage_error("mux", StorageError::UploadFailed("503".into()));
        assert_eq!(e.kind, ErrorKind::StorageUnavailable);
        assert!(e.retryable);
    }
}

//! External media tooling for ReelBeat.
//!
//! Everything frame-level is delegated to ffmpeg/ffprobe through one
//! canonical envelope, [`invoke::ToolInvoker`]: fixed argv, streamed
//! stderr tail, per-stage timeout with graceful termination. The rest
//! of this crate builds stage-specific argv and parses probe output;
//! nothing here interprets tool stdout beyond ffprobe's JSON.

pub mod error;
pub mod ffmpeg;
pub mod grade;
pub mod invoke;
pub mod probe;
pub mod stages;

pub use error::{MediaError, MediaResult};
pub use ffmpeg::{check_ffmpeg, check_ffprobe, FfmpegCommand};
pub use grade::build_grade_filter;
pub use invoke::{ToolCommand, ToolInvoker, ToolOutcome, STDERR_TAIL_BYTES};
pub use probe::{decode_check, get_duration, probe_media, MediaInfo};
pub use stages::{
    analysis_wav, cut_and_concat, mux, normalize_image, normalize_video, slice_audio, style_grade,
    ConcatClip, ANALYSIS_SAMPLE_RATE,
};

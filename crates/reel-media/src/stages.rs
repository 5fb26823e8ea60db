//! Per-stage ffmpeg argument builders.
//!
//! Each builder returns a fully specified [`FfmpegCommand`]; the
//! stage runner owns timeouts and execution.

use std::path::{Path, PathBuf};

use reel_models::{
    AudioWindow, ColorGrade, EncodingConfig, Transition, AUDIO_SAMPLE_RATE, OUTPUT_FPS,
    OUTPUT_HEIGHT, OUTPUT_WIDTH,
};

use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::FfmpegCommand;
use crate::grade::build_grade_filter;

/// Analysis WAV sample rate (mono, for the beat analyzer).
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;

/// Below this ratio delta a clip is used at natural speed.
const STRETCH_EPSILON: f64 = 0.005;

/// Scale/pad/fps chain normalizing any input to the output raster.
fn normalize_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps={fps}",
        w = OUTPUT_WIDTH,
        h = OUTPUT_HEIGHT,
        fps = OUTPUT_FPS
    )
}

/// `audio_slice`: cut the window out of the source track, re-encoded
/// to uniform AAC stereo.
pub fn slice_audio(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    window: &AudioWindow,
    enc: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .seek(window.start_sec)
        .duration(window.length_sec())
        .no_video()
        .output_args(["-c:a", &enc.audio_codec])
        .output_args(["-b:a", &enc.audio_bitrate])
        .output_args(["-ar", &AUDIO_SAMPLE_RATE.to_string()])
        .output_args(["-ac", "2"])
}

/// `audio_slice` sidecar: mono PCM for the beat analyzer, so analysis
/// never decodes a lossy container itself.
pub fn analysis_wav(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    window: &AudioWindow,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .seek(window.start_sec)
        .duration(window.length_sec())
        .no_video()
        .output_args(["-c:a", "pcm_s16le"])
        .output_args(["-ar", &ANALYSIS_SAMPLE_RATE.to_string()])
        .output_args(["-ac", "1"])
}

/// `normalize` for a video clip: target raster and frame rate, own
/// duration stretched or trimmed to `target_duration`.
///
/// Clips longer than the target are trimmed; shorter ones are slowed
/// with `setpts` so they fill the slot.
pub fn normalize_video(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    source_duration: f64,
    target_duration: f64,
    enc: &EncodingConfig,
) -> MediaResult<FfmpegCommand> {
    if source_duration <= 0.0 {
        return Err(MediaError::InvalidMedia(format!(
            "non-positive source duration {source_duration}"
        )));
    }

    let ratio = target_duration / source_duration;
    let filter = if ratio > 1.0 + STRETCH_EPSILON {
        format!("{},setpts={ratio:.6}*PTS,fps={OUTPUT_FPS}", normalize_filter())
    } else {
        normalize_filter()
    };

    Ok(FfmpegCommand::new(input, output)
        .video_filter(filter)
        .output_args(["-t", &format!("{target_duration:.3}")])
        .output_args(enc.video_args())
        .output_args(["-pix_fmt", "yuv420p"])
        .no_audio())
}

/// `normalize` for a still image: looped to the target duration.
pub fn normalize_image(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    target_duration: f64,
    enc: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::to_output(output)
        .input_with_args(
            ["-loop".to_string(), "1".to_string(), "-t".to_string(), format!("{target_duration:.3}")],
            input,
        )
        .video_filter(normalize_filter())
        .output_args(enc.video_args())
        .output_args(["-pix_fmt", "yuv420p"])
        .no_audio()
}

/// One input of the `cut_and_concat` graph.
#[derive(Debug, Clone)]
pub struct ConcatClip {
    /// Local path of the normalized clip
    pub path: PathBuf,
    /// Slice start within the clip, seconds
    pub trim_in: f64,
    /// Slice end within the clip, seconds
    pub trim_out: f64,
    /// Time the clip occupies in the graph before transition overlap
    pub render_len: f64,
}

impl ConcatClip {
    fn slice_len(&self) -> f64 {
        self.trim_out - self.trim_in
    }
}

/// `cut_and_concat`: one continuous silent video track from the
/// normalized clips, honoring the boundary transition descriptors.
///
/// Hard-cut boundaries use the `concat` filter; blending boundaries
/// chain `xfade`, each transition starting at its planned boundary.
/// A clip whose slice is shorter than its `render_len` is slowed with
/// `setpts` so the timeline boundaries land where the plan put them.
pub fn cut_and_concat(
    clips: &[ConcatClip],
    transitions: &[Transition],
    output: impl AsRef<Path>,
    enc: &EncodingConfig,
) -> MediaResult<FfmpegCommand> {
    if clips.is_empty() {
        return Err(MediaError::InvalidMedia("no clips to concatenate".into()));
    }
    if transitions.len() + 1 != clips.len() {
        return Err(MediaError::InvalidMedia(format!(
            "{} clips need {} transitions, got {}",
            clips.len(),
            clips.len() - 1,
            transitions.len()
        )));
    }
    for (i, clip) in clips.iter().enumerate() {
        if clip.slice_len() <= 0.0 || clip.render_len <= 0.0 {
            return Err(MediaError::InvalidMedia(format!(
                "clip {i} has a non-positive slice or render length"
            )));
        }
    }

    let mut graph = String::new();

    // Per-input prep: trim the slice, restore timestamps, stretch if
    // the slice has to fill a longer slot, and unify pixel geometry.
    for (i, clip) in clips.iter().enumerate() {
        let ratio = clip.render_len / clip.slice_len();
        let stretch = if (ratio - 1.0).abs() > STRETCH_EPSILON {
            format!(",setpts={ratio:.6}*PTS,fps={OUTPUT_FPS}")
        } else {
            String::new()
        };
        graph.push_str(&format!(
            "[{i}:v]trim=start={start:.3}:end={end:.3},setpts=PTS-STARTPTS{stretch},\
             format=yuv420p,setsar=1[v{i}];",
            start = clip.trim_in,
            end = clip.trim_out,
        ));
    }

    // Pairwise chain, left to right.
    let mut current = "v0".to_string();
    let mut current_len = clips[0].render_len;

    for (j, transition) in transitions.iter().enumerate() {
        let next = format!("v{}", j + 1);
        let out = format!("x{}", j + 1);

        if let (Some(name), true) = (transition.kind.xfade_name(), transition.blends()) {
            let duration = transition.duration_sec();
            let offset = (current_len - duration).max(0.0);
            graph.push_str(&format!(
                "[{current}][{next}]xfade=transition={name}:duration={duration:.3}:offset={offset:.3}[{out}];"
            ));
            current_len = current_len + clips[j + 1].render_len - duration;
        } else {
            graph.push_str(&format!("[{current}][{next}]concat=n=2:v=1:a=0[{out}];"));
            current_len += clips[j + 1].render_len;
        }
        current = out;
    }

    graph.push_str(&format!("[{current}]format=yuv420p[vout]"));

    let mut cmd = FfmpegCommand::to_output(output);
    for clip in clips {
        cmd = cmd.input(&clip.path);
    }

    Ok(cmd
        .filter_complex(graph)
        .output_args(["-map", "[vout]"])
        .output_args(enc.video_args())
        .no_audio())
}

/// `style_grade`: apply the preset's color contract.
pub fn style_grade(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    grade: &ColorGrade,
    enc: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_filter(build_grade_filter(grade))
        .output_args(enc.video_args())
        .no_audio()
}

/// `mux`: final container with the graded video and the sliced audio.
pub fn mux(
    video: impl AsRef<Path>,
    audio: impl AsRef<Path>,
    output: impl AsRef<Path>,
    enc: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::to_output(output)
        .input(video)
        .input(audio)
        .output_args(["-map", "0:v:0"])
        .output_args(["-map", "1:a:0"])
        .output_args(enc.video_args())
        .output_args(enc.audio_args())
        .output_args(["-shortest"])
        .output_args(["-movflags", "+faststart"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::TransitionKind;

    fn clip(len: f64) -> ConcatClip {
        ConcatClip {
            path: PathBuf::from(format!("normalized_{len}.mp4")),
            trim_in: 0.0,
            trim_out: len,
            render_len: len,
        }
    }

    fn filter_of(cmd: &FfmpegCommand) -> String {
        let args = cmd.build_args();
        let pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        args[pos + 1].clone()
    }

    #[test]
    fn test_slice_audio_args() {
        let enc = EncodingConfig::default();
        let args = slice_audio("track.mp3", "sliced.m4a", &AudioWindow::new(12.0, 42.0), &enc)
            .build_args();
        assert!(args.contains(&"-ss".to_string()));
        assert!(args.contains(&"12.000".to_string()));
        assert!(args.contains(&"30.000".to_string()));
        assert!(args.contains(&"-vn".to_string()));
        assert!(args.contains(&"aac".to_string()));
        assert!(args.contains(&"44100".to_string()));
    }

    #[test]
    fn test_analysis_wav_is_mono_pcm() {
        let args = analysis_wav("track.mp3", "analysis.wav", &AudioWindow::new(0.0, 30.0))
            .build_args();
        assert!(args.contains(&"pcm_s16le".to_string()));
        assert!(args.contains(&"22050".to_string()));
        assert!(args.contains(&"1".to_string()));
    }

    #[test]
    fn test_normalize_trims_long_clip() {
        let enc = EncodingConfig::intermediate();
        let cmd = normalize_video("clip.mp4", "normalized_0.mp4", 25.0, 10.0, &enc).unwrap();
        let args = cmd.build_args();
        assert!(args.contains(&"-t".to_string()));
        assert!(args.contains(&"10.000".to_string()));
        // No stretch for a long clip
        let vf_pos = args.iter().position(|a| a == "-vf").unwrap();
        assert!(!args[vf_pos + 1].contains("setpts"));
        assert!(args[vf_pos + 1].contains("scale=1080:1920"));
        assert!(args.contains(&"-an".to_string()));
    }

    #[test]
    fn test_normalize_stretches_short_clip() {
        let enc = EncodingConfig::intermediate();
        let cmd = normalize_video("clip.mp4", "normalized_0.mp4", 4.0, 10.0, &enc).unwrap();
        let args = cmd.build_args();
        let vf_pos = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf_pos + 1].contains("setpts=2.5"));
    }

    #[test]
    fn test_normalize_image_loops() {
        let enc = EncodingConfig::intermediate();
        let args = normalize_image("photo.jpg", "normalized_1.mp4", 10.0, &enc).build_args();
        assert!(args.contains(&"-loop".to_string()));
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
    }

    #[test]
    fn test_concat_hard_cuts_use_concat_filter() {
        let enc = EncodingConfig::default();
        let clips = vec![clip(10.0), clip(10.0), clip(10.0)];
        let transitions = vec![Transition::HARD_CUT, Transition::HARD_CUT];
        let cmd = cut_and_concat(&clips, &transitions, "concat.mp4", &enc).unwrap();
        let filter = filter_of(&cmd);
        assert_eq!(filter.matches("concat=n=2").count(), 2);
        assert!(!filter.contains("xfade"));
    }

    #[test]
    fn test_concat_crossfade_offsets() {
        let enc = EncodingConfig::default();
        // Left clip extended by the 0.5s transition it feeds
        let clips = vec![
            ConcatClip { path: "a.mp4".into(), trim_in: 0.0, trim_out: 10.5, render_len: 10.5 },
            clip(10.0),
        ];
        let transitions = vec![Transition::crossfade(500)];
        let cmd = cut_and_concat(&clips, &transitions, "concat.mp4", &enc).unwrap();
        let filter = filter_of(&cmd);
        assert!(filter.contains("xfade=transition=fade:duration=0.500:offset=10.000"));
    }

    #[test]
    fn test_concat_stretches_undersized_slice() {
        let enc = EncodingConfig::default();
        let clips = vec![
            ConcatClip { path: "a.mp4".into(), trim_in: 0.0, trim_out: 10.0, render_len: 11.0 },
            clip(10.0),
        ];
        let transitions = vec![Transition::HARD_CUT];
        let filter = filter_of(&cut_and_concat(&clips, &transitions, "c.mp4", &enc).unwrap());
        assert!(filter.contains("setpts=1.1"));
    }

    #[test]
    fn test_concat_fade_black_uses_fadeblack() {
        let enc = EncodingConfig::default();
        let clips = vec![clip(15.0), clip(15.0)];
        let transitions = vec![Transition::fade_black(400)];
        let filter = filter_of(&cut_and_concat(&clips, &transitions, "c.mp4", &enc).unwrap());
        assert!(filter.contains("xfade=transition=fadeblack"));
    }

    #[test]
    fn test_concat_arity_checked() {
        let enc = EncodingConfig::default();
        assert!(cut_and_concat(&[clip(10.0)], &[Transition::HARD_CUT], "c.mp4", &enc).is_err());
        assert!(cut_and_concat(&[], &[], "c.mp4", &enc).is_err());
    }

    #[test]
    fn test_mux_args() {
        let enc = EncodingConfig::default();
        let args = mux("graded.mp4", "sliced.m4a", "muxed.mp4", &enc).build_args();
        assert!(args.contains(&"0:v:0".to_string()));
        assert!(args.contains(&"1:a:0".to_string()));
        assert!(args.contains(&"-shortest".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_style_grade_silent() {
        let enc = EncodingConfig::default();
        let args = style_grade(
            "concat.mp4",
            "graded.mp4",
            &reel_models::Style::LuxeTravel.color_grade(),
            &enc,
        )
        .build_args();
        assert!(args.contains(&"-an".to_string()));
        let vf_pos = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf_pos + 1].contains("colorbalance"));
    }
}

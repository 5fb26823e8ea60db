//! FFmpeg argv builder.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MediaError, MediaResult};
use crate::invoke::ToolCommand;

/// Builder for ffmpeg invocations with one or more inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs as (pre-input args, path)
    inputs: Vec<(Vec<String>, PathBuf)>,
    /// Output file path
    output: PathBuf,
    /// Arguments after the last input
    output_args: Vec<String>,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command with a single plain input.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![(Vec::new(), input.as_ref().to_path_buf())],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// Create a command with no inputs yet.
    pub fn to_output(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// Add an input with its own pre-input arguments.
    pub fn input_with_args<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push((
            args.into_iter().map(Into::into).collect(),
            path.as_ref().to_path_buf(),
        ));
        self
    }

    /// Add a plain input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(Vec::<String>::new(), path)
    }

    /// Add pre-input args to the first input (seek, duration, loop).
    pub fn first_input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some((pre, _)) = self.inputs.first_mut() {
            pre.extend(args.into_iter().map(Into::into));
        }
        self
    }

    /// Seek position on the first input.
    pub fn seek(self, seconds: f64) -> Self {
        self.first_input_args(["-ss".to_string(), format!("{seconds:.3}")])
    }

    /// Duration limit on the first input.
    pub fn duration(self, seconds: f64) -> Self {
        self.first_input_args(["-t".to_string(), format!("{seconds:.3}")])
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Drop the audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Drop the video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the argv.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
        ];

        for (pre, path) in &self.inputs {
            args.extend(pre.clone());
            args.push("-i".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());
        args
    }

    /// Turn into a tool command with the given timeout.
    pub fn into_tool_command(self, timeout: Duration) -> MediaResult<ToolCommand> {
        let ffmpeg = check_ffmpeg()?;
        Ok(ToolCommand::new(ffmpeg.to_string_lossy().to_string())
            .args(self.build_args())
            .timeout(timeout))
    }
}

/// Check if ffmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if ffprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_input_builder() {
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4")
            .seek(10.0)
            .duration(30.0)
            .output_args(["-c:v", "libx264"])
            .build_args();

        // Seek and duration are pre-input
        let i_pos = cmd.iter().position(|a| a == "-i").unwrap();
        let ss_pos = cmd.iter().position(|a| a == "-ss").unwrap();
        assert!(ss_pos < i_pos);
        assert!(cmd.contains(&"10.000".to_string()));
        assert!(cmd.contains(&"libx264".to_string()));
        assert_eq!(cmd.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_multi_input_builder() {
        let cmd = FfmpegCommand::to_output("out.mp4")
            .input("a.mp4")
            .input("b.mp4")
            .filter_complex("[0:v][1:v]xfade=transition=fade:duration=0.5:offset=9.5[v]")
            .output_args(["-map", "[v]"])
            .build_args();

        assert_eq!(cmd.iter().filter(|a| *a == "-i").count(), 2);
        assert!(cmd.contains(&"-filter_complex".to_string()));
    }

    #[test]
    fn test_loop_input_args() {
        let cmd = FfmpegCommand::to_output("out.mp4")
            .input_with_args(["-loop", "1", "-t", "10.000"], "img.jpg")
            .build_args();
        let loop_pos = cmd.iter().position(|a| a == "-loop").unwrap();
        let i_pos = cmd.iter().position(|a| a == "-i").unwrap();
        assert!(loop_pos < i_pos);
    }
}

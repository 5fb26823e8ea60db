//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::{check_ffmpeg, check_ffprobe};
use crate::invoke::{ToolCommand, ToolInvoker};

/// Probed media file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container duration in seconds
    pub duration: f64,
    /// Width in pixels (0 when no video stream)
    pub width: u32,
    /// Height in pixels (0 when no video stream)
    pub height: u32,
    /// Frame rate (fps, 0 when no video stream)
    pub fps: f64,
    /// Video codec name
    pub video_codec: Option<String>,
    /// Audio codec name
    pub audio_codec: Option<String>,
    /// Number of video streams
    pub video_streams: usize,
    /// Number of audio streams
    pub audio_streams: usize,
    /// File size in bytes
    pub size: u64,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video_streams > 0
    }

    pub fn has_audio(&self) -> bool {
        self.audio_streams > 0
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Probe a media file.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = check_ffprobe()?;

    let output = tokio::process::Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::tool_failed(
            output.status.code(),
            String::from_utf8_lossy(&output.stderr),
        ));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");
    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .and_then(|s| {
            s.avg_frame_rate
                .as_ref()
                .or(s.r_frame_rate.as_ref())
                .and_then(|r| parse_frame_rate(r))
        })
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration,
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        fps,
        video_codec: video_stream.and_then(|s| s.codec_name.clone()),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        video_streams: probe.streams.iter().filter(|s| s.codec_type == "video").count(),
        audio_streams: probe.streams.iter().filter(|s| s.codec_type == "audio").count(),
        size,
    })
}

/// Get media duration in seconds.
pub async fn get_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let info = probe_media(path).await?;
    Ok(info.duration)
}

/// Full decode passthrough: fails if any frame cannot be decoded.
///
/// Used by the quality gate; a file may probe cleanly yet still carry
/// corrupt packets.
pub async fn decode_check(path: impl AsRef<Path>, timeout: Duration) -> MediaResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffmpeg = check_ffmpeg()?;
    let cmd = ToolCommand::new(ffmpeg.to_string_lossy().to_string())
        .args(["-v", "error", "-i"])
        .arg(path.to_string_lossy().to_string())
        .args(["-f", "null", "-"])
        .timeout(timeout);

    let outcome = ToolInvoker::new().run(&cmd).await?;
    if !outcome.success() {
        return Err(MediaError::tool_failed(outcome.exit_code, outcome.stderr_tail));
    }
    if !outcome.stderr_tail.trim().is_empty() {
        return Err(MediaError::InvalidMedia(format!(
            "decode errors: {}",
            outcome.stderr_tail.trim()
        )));
    }
    Ok(())
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("bad").is_none());
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_media("/nonexistent/file.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}

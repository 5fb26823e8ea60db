//! Job creation request types.

use serde::{Deserialize, Serialize};

/// Fixed length of a reel, seconds. The audio window must match it.
pub const REEL_DURATION_SEC: f64 = 30.0;

/// Window of the audio track to use for the reel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioWindow {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl AudioWindow {
    pub fn new(start_sec: f64, end_sec: f64) -> Self {
        Self { start_sec, end_sec }
    }

    pub fn length_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    /// Whether the window has the required reel length.
    pub fn is_reel_length(&self) -> bool {
        (self.length_sec() - REEL_DURATION_SEC).abs() < 1e-6
    }
}

/// Input set for `JobService::create`.
///
/// The referenced artifacts were already written to the blob store by
/// the upload surface; creation links them to the new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReelRequest {
    /// Input clip artifacts, in timeline order
    pub clips: Vec<crate::artifact::ArtifactId>,
    /// Input audio artifact
    pub audio: crate::artifact::ArtifactId,
    /// Audio window, must be exactly 30 seconds long
    pub audio_window: AudioWindow,
    /// Style preset name; unknown styles are rejected at the edge
    pub style: crate::style::Style,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_length() {
        assert!(AudioWindow::new(5.0, 35.0).is_reel_length());
        assert!(!AudioWindow::new(5.0, 34.0).is_reel_length());
        assert!(!AudioWindow::new(35.0, 5.0).is_reel_length());
    }
}

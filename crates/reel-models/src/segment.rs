//! Segment plan types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of transition applied at a segment's trailing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    HardCut,
    Crossfade,
    FadeBlack,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::HardCut => "hard_cut",
            TransitionKind::Crossfade => "crossfade",
            TransitionKind::FadeBlack => "fade_black",
        }
    }

    /// The ffmpeg `xfade` transition name for this kind, if it blends.
    pub fn xfade_name(&self) -> Option<&'static str> {
        match self {
            TransitionKind::HardCut => None,
            TransitionKind::Crossfade => Some("fade"),
            TransitionKind::FadeBlack => Some("fadeblack"),
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition descriptor at a segment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transition {
    pub kind: TransitionKind,
    pub duration_ms: u32,
}

impl Transition {
    pub const HARD_CUT: Transition = Transition {
        kind: TransitionKind::HardCut,
        duration_ms: 0,
    };

    pub fn crossfade(duration_ms: u32) -> Self {
        Self {
            kind: TransitionKind::Crossfade,
            duration_ms,
        }
    }

    pub fn fade_black(duration_ms: u32) -> Self {
        Self {
            kind: TransitionKind::FadeBlack,
            duration_ms,
        }
    }

    pub fn duration_sec(&self) -> f64 {
        f64::from(self.duration_ms) / 1000.0
    }

    /// Whether the boundary blends frames (anything but a hard cut).
    pub fn blends(&self) -> bool {
        self.kind != TransitionKind::HardCut && self.duration_ms > 0
    }
}

/// One output-timeline interval sourced from one input clip.
///
/// Stored index-ordered as the JSON artifact `segments` at stage `plan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Position in the output timeline, starting at 0
    pub index: usize,
    /// Name of the source clip artifact
    pub source_artifact_name: String,
    /// Slice start within the source, seconds
    pub source_in_sec: f64,
    /// Slice end within the source, seconds
    pub source_out_sec: f64,
    /// End of this segment on the output timeline, seconds
    pub target_out_sec: f64,
    /// Transition at this segment's trailing boundary
    pub transition_out: Transition,
}

impl Segment {
    /// Start of this segment on the output timeline, derived from the
    /// previous segment's `target_out_sec` (0 for the first).
    pub fn target_in_sec(segments: &[Segment], index: usize) -> f64 {
        if index == 0 {
            0.0
        } else {
            segments[index - 1].target_out_sec
        }
    }

    /// Duration of this segment on the output timeline.
    pub fn duration_sec(segments: &[Segment], index: usize) -> f64 {
        segments[index].target_out_sec - Self::target_in_sec(segments, index)
    }
}

/// Validate a segment plan: index-ordered, contiguous, covering
/// `[0, total_sec]`, with every blending transition capped at half the
/// shorter adjacent segment.
pub fn validate_segments(segments: &[Segment], total_sec: f64) -> Result<(), String> {
    if segments.is_empty() {
        return Err("empty segment plan".to_string());
    }

    for (i, seg) in segments.iter().enumerate() {
        if seg.index != i {
            return Err(format!("segment {i} carries index {}", seg.index));
        }
        let start = Segment::target_in_sec(segments, i);
        if seg.target_out_sec <= start {
            return Err(format!("segment {i} has non-positive duration"));
        }
        if seg.source_out_sec <= seg.source_in_sec {
            return Err(format!("segment {i} has inverted source slice"));
        }
    }

    let last = segments.last().map(|s| s.target_out_sec).unwrap_or(0.0);
    if (last - total_sec).abs() > 1e-6 {
        return Err(format!(
            "plan covers [0, {last:.3}], expected [0, {total_sec:.3}]"
        ));
    }

    for i in 0..segments.len().saturating_sub(1) {
        let t = segments[i].transition_out;
        if t.blends() {
            let left = Segment::duration_sec(segments, i);
            let right = Segment::duration_sec(segments, i + 1);
            let cap = left.min(right) / 2.0;
            if t.duration_sec() > cap + 1e-9 {
                return Err(format!(
                    "transition after segment {i} ({:.3}s) exceeds cap {cap:.3}s",
                    t.duration_sec()
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(index: usize, out: f64, transition: Transition) -> Segment {
        Segment {
            index,
            source_artifact_name: format!("clip_{index}"),
            source_in_sec: 0.0,
            source_out_sec: out,
            target_out_sec: out * (index as f64 + 1.0),
            transition_out: transition,
        }
    }

    #[test]
    fn test_contiguous_plan_validates() {
        let segments = vec![
            seg(0, 10.0, Transition::HARD_CUT),
            seg(1, 10.0, Transition::HARD_CUT),
            seg(2, 10.0, Transition::HARD_CUT),
        ];
        assert!(validate_segments(&segments, 30.0).is_ok());
    }

    #[test]
    fn test_coverage_mismatch_rejected() {
        let segments = vec![seg(0, 10.0, Transition::HARD_CUT)];
        assert!(validate_segments(&segments, 30.0).is_err());
    }

    #[test]
    fn test_crossfade_cap_enforced() {
        let mut segments = vec![
            seg(0, 10.0, Transition::crossfade(6000)),
            seg(1, 10.0, Transition::HARD_CUT),
            seg(2, 10.0, Transition::HARD_CUT),
        ];
        // 6 s > min(10, 10)/2 = 5 s
        assert!(validate_segments(&segments, 30.0).is_err());

        segments[0].transition_out = Transition::crossfade(5000);
        assert!(validate_segments(&segments, 30.0).is_ok());
    }

    #[test]
    fn test_transition_kind_xfade_names() {
        assert_eq!(TransitionKind::Crossfade.xfade_name(), Some("fade"));
        assert_eq!(TransitionKind::FadeBlack.xfade_name(), Some("fadeblack"));
        assert_eq!(TransitionKind::HardCut.xfade_name(), None);
    }
}

//! Beat-aligned segment planning.

use tracing::{debug, info};

use reel_models::{BeatPlan, Segment, Style, Transition, REEL_DURATION_SEC};

use crate::error::{PlanError, PlanResult};

/// Shortest segment the planner will emit, seconds. Snap targets that
/// would squeeze a neighbor below this are skipped.
const MIN_SEGMENT_SEC: f64 = 1.0;

/// Cut planner.
///
/// Boundaries start from the ideal equal split, then snap to the
/// highest-scoring cut candidate within a quarter segment, falling
/// back to the nearest beat within half a segment, falling back to
/// the ideal time. Planning is pure: identical inputs produce
/// byte-identical segments.
pub struct CutPlanner {
    total_sec: f64,
}

impl Default for CutPlanner {
    fn default() -> Self {
        Self {
            total_sec: REEL_DURATION_SEC,
        }
    }
}

impl CutPlanner {
    pub fn new(total_sec: f64) -> Self {
        Self { total_sec }
    }

    /// Plan the segment list for `clip_names.len()` clips.
    pub fn plan(
        &self,
        beat_plan: &BeatPlan,
        clip_names: &[String],
        style: Style,
    ) -> PlanResult<Vec<Segment>> {
        let clip_count = clip_names.len();
        if clip_count == 0 {
            return Err(PlanError::infeasible("no input clips"));
        }
        if self.total_sec < MIN_SEGMENT_SEC * clip_count as f64 {
            return Err(PlanError::infeasible(format!(
                "{clip_count} clips cannot fit {:.1}s",
                self.total_sec
            )));
        }

        let segment_len = self.total_sec / clip_count as f64;

        // Inner boundaries: one per cut, snapped
        let mut boundaries = Vec::with_capacity(clip_count + 1);
        boundaries.push(0.0);
        for i in 1..clip_count {
            let ideal = segment_len * i as f64;
            let remaining = (clip_count - i) as f64;
            let lo = boundaries[i - 1] + MIN_SEGMENT_SEC;
            let hi = self.total_sec - MIN_SEGMENT_SEC * remaining;

            let snapped = self.snap_boundary(beat_plan, ideal, segment_len, lo, hi);
            debug!("Boundary {i}: ideal {ideal:.2}s -> {snapped:.2}s");
            boundaries.push(snapped);
        }
        boundaries.push(self.total_sec);

        // Normalized clips are each `segment_len` long; a trailing
        // blend needs that much extra material from the left clip.
        let default_transition = style.default_transition();
        let mut segments = Vec::with_capacity(clip_count);

        for i in 0..clip_count {
            let duration = boundaries[i + 1] - boundaries[i];
            let transition_out = if i + 1 < clip_count {
                let next_duration = boundaries[i + 2] - boundaries[i + 1];
                clamp_transition(default_transition, duration, next_duration)
            } else {
                Transition::HARD_CUT
            };

            let slice = (duration + transition_out.duration_sec()).min(segment_len);
            segments.push(Segment {
                index: i,
                source_artifact_name: clip_names[i].clone(),
                source_in_sec: 0.0,
                source_out_sec: slice,
                target_out_sec: boundaries[i + 1],
                transition_out,
            });
        }

        reel_models::segment::validate_segments(&segments, self.total_sec)
            .map_err(PlanError::infeasible)?;

        info!(
            "Planned {} segments, boundaries {:?}",
            segments.len(),
            &boundaries[1..boundaries.len() - 1]
        );
        Ok(segments)
    }

    /// Snap one ideal boundary: best candidate in ±L/4, else nearest
    /// beat in ±L/2, else the ideal time, all confined to `(lo, hi)`.
    fn snap_boundary(
        &self,
        beat_plan: &BeatPlan,
        ideal: f64,
        segment_len: f64,
        lo: f64,
        hi: f64,
    ) -> f64 {
        let candidate_radius = segment_len / 4.0;
        let beat_radius = segment_len / 2.0;
        let in_bounds = |t: f64| t > lo && t < hi;

        // Candidates arrive sorted by descending score, ties earlier
        // first, so the first match is the snap target.
        if let Some(c) = beat_plan
            .cut_candidates
            .iter()
            .find(|c| (c.time_sec - ideal).abs() <= candidate_radius && in_bounds(c.time_sec))
        {
            return c.time_sec;
        }

        if let Some(b) = beat_plan
            .beats
            .iter()
            .copied()
            .filter(|&b| (b - ideal).abs() <= beat_radius && in_bounds(b))
            .min_by(|a, b| {
                (a - ideal)
                    .abs()
                    .partial_cmp(&(b - ideal).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        {
            return b;
        }

        if lo < hi {
            ideal.max(lo + 1e-9).min(hi - 1e-9)
        } else {
            ideal
        }
    }
}

/// Cap a blending transition at half the shorter adjacent segment.
fn clamp_transition(transition: Transition, left_sec: f64, right_sec: f64) -> Transition {
    if !transition.blends() {
        return transition;
    }
    let cap_ms = (left_sec.min(right_sec) / 2.0 * 1000.0).floor() as u32;
    Transition {
        kind: transition.kind,
        duration_ms: transition.duration_ms.min(cap_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{segment::validate_segments, CutCandidate, TransitionKind};

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("clip_{i}")).collect()
    }

    /// Beats every half second with strong candidates on the second.
    fn dense_plan() -> BeatPlan {
        let beats: Vec<f64> = (1..60).map(|i| i as f64 * 0.5).collect();
        let mut cut_candidates: Vec<CutCandidate> = beats
            .iter()
            .map(|&t| CutCandidate {
                time_sec: t,
                score: if (t - t.round()).abs() < 1e-9 { 0.9 } else { 0.3 },
            })
            .collect();
        cut_candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then(a.time_sec.partial_cmp(&b.time_sec).unwrap())
        });
        BeatPlan {
            tempo_bpm: 120.0,
            beats,
            cut_candidates,
        }
    }

    #[test]
    fn test_three_clips_hard_cuts() {
        let segments = CutPlanner::default()
            .plan(&dense_plan(), &names(3), Style::EnergeticDance)
            .unwrap();

        assert_eq!(segments.len(), 3);
        validate_segments(&segments, 30.0).unwrap();

        // Boundaries snapped within a quarter segment of the ideal
        assert!((segments[0].target_out_sec - 10.0).abs() <= 2.5);
        assert!((segments[1].target_out_sec - 20.0).abs() <= 2.5);
        assert!((segments[2].target_out_sec - 30.0).abs() < 1e-9);

        for seg in &segments {
            assert_eq!(seg.transition_out.kind, TransitionKind::HardCut);
        }
    }

    #[test]
    fn test_single_clip() {
        let segments = CutPlanner::default()
            .plan(&dense_plan(), &names(1), Style::CinematicDrama)
            .unwrap();

        assert_eq!(segments.len(), 1);
        assert!((segments[0].target_out_sec - 30.0).abs() < 1e-9);
        assert_eq!(segments[0].transition_out, Transition::HARD_CUT);
        assert!((segments[0].source_out_sec - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossfade_style_carries_transitions() {
        let segments = CutPlanner::default()
            .plan(&dense_plan(), &names(2), Style::LuxeTravel)
            .unwrap();

        assert_eq!(segments[0].transition_out.kind, TransitionKind::Crossfade);
        assert_eq!(segments[0].transition_out.duration_ms, 500);
        // Last segment never blends out
        assert_eq!(segments[1].transition_out, Transition::HARD_CUT);
        // Left slice extends to feed the overlap
        let d0 = segments[0].target_out_sec;
        assert!((segments[0].source_out_sec - (d0 + 0.5).min(15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_beat_fallback_when_no_candidate_qualifies() {
        // A single distant candidate, but beats near the ideal
        let plan = BeatPlan {
            tempo_bpm: 120.0,
            beats: vec![4.0, 9.4, 14.0, 20.6, 26.0],
            cut_candidates: vec![CutCandidate { time_sec: 4.0, score: 1.0 }],
        };
        let segments = CutPlanner::default()
            .plan(&plan, &names(3), Style::EnergeticDance)
            .unwrap();

        // Ideal 10 -> nearest beat 9.4; ideal 20 -> nearest beat 20.6
        assert!((segments[0].target_out_sec - 9.4).abs() < 1e-9);
        assert!((segments[1].target_out_sec - 20.6).abs() < 1e-9);
    }

    #[test]
    fn test_ideal_fallback_with_empty_beats() {
        let plan = BeatPlan {
            tempo_bpm: 0.0,
            beats: vec![],
            cut_candidates: vec![],
        };
        let segments = CutPlanner::default()
            .plan(&plan, &names(3), Style::EnergeticDance)
            .unwrap();

        assert!((segments[0].target_out_sec - 10.0).abs() < 1e-6);
        assert!((segments[1].target_out_sec - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_transition_cap() {
        // A 500ms crossfade between a 0.6s and a 3s segment must
        // shrink to half the shorter side: 300ms.
        let clamped = clamp_transition(Transition::crossfade(500), 0.6, 3.0);
        assert_eq!(clamped.kind, TransitionKind::Crossfade);
        assert_eq!(clamped.duration_ms, 300);

        // Wide segments leave the default untouched
        let kept = clamp_transition(Transition::crossfade(500), 10.0, 10.0);
        assert_eq!(kept.duration_ms, 500);

        // Hard cuts pass through
        let hard = clamp_transition(Transition::HARD_CUT, 0.1, 0.1);
        assert_eq!(hard, Transition::HARD_CUT);
    }

    #[test]
    fn test_infeasible_inputs() {
        assert!(CutPlanner::default()
            .plan(&dense_plan(), &[], Style::EnergeticDance)
            .is_err());
        // 40 clips cannot fit 30 seconds at the minimum segment length
        assert!(CutPlanner::default()
            .plan(&dense_plan(), &names(40), Style::EnergeticDance)
            .is_err());
    }

    #[test]
    fn test_determinism() {
        let planner = CutPlanner::default();
        let a = planner
            .plan(&dense_plan(), &names(4), Style::ModernMinimal)
            .unwrap();
        let b = planner
            .plan(&dense_plan(), &names(4), Style::ModernMinimal)
            .unwrap();
        assert_eq!(a, b);
    }
}

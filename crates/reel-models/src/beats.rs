//! Beat analysis output.

use serde::{Deserialize, Serialize};

/// A beat eligible to become a segment boundary, scored by salience.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutCandidate {
    /// Time within the audio window, seconds
    pub time_sec: f64,
    /// Salience score in [0, 1]
    pub score: f64,
}

/// Result of beat analysis over one audio window.
///
/// Stored as the JSON artifact `beat_plan` at stage `beats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatPlan {
    /// Estimated tempo in beats per minute
    pub tempo_bpm: f64,
    /// Beat times in seconds, strictly increasing, within the window
    pub beats: Vec<f64>,
    /// Scored subset of beats, sorted by descending score
    pub cut_candidates: Vec<CutCandidate>,
}

impl BeatPlan {
    /// Validate the plan invariants against the window length.
    ///
    /// Beats must be strictly increasing and lie in `[0, window_length]`;
    /// candidates must be a time-subset of the beats, score in [0, 1],
    /// sorted by descending score.
    pub fn validate(&self, window_length: f64) -> Result<(), String> {
        let mut prev = f64::NEG_INFINITY;
        for &b in &self.beats {
            if b < 0.0 || b > window_length {
                return Err(format!("beat {b:.3} outside [0, {window_length:.3}]"));
            }
            if b <= prev {
                return Err(format!("beats not strictly increasing at {b:.3}"));
            }
            prev = b;
        }

        let mut prev_score = f64::INFINITY;
        for c in &self.cut_candidates {
            if !(0.0..=1.0).contains(&c.score) {
                return Err(format!("candidate score {} outside [0, 1]", c.score));
            }
            if c.score > prev_score {
                return Err("candidates not sorted by descending score".to_string());
            }
            prev_score = c.score;
            if !self.beats.iter().any(|&b| (b - c.time_sec).abs() < 1e-6) {
                return Err(format!("candidate {:.3} is not a beat", c.time_sec));
            }
        }

        Ok(())
    }

    /// Beat nearest to `t`, if any beats exist.
    pub fn nearest_beat(&self, t: f64) -> Option<f64> {
        self.beats
            .iter()
            .copied()
            .min_by(|a, b| {
                (a - t).abs()
                    .partial_cmp(&(b - t).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> BeatPlan {
        BeatPlan {
            tempo_bpm: 120.0,
            beats: vec![0.5, 1.0, 1.5, 2.0],
            cut_candidates: vec![
                CutCandidate { time_sec: 1.0, score: 0.9 },
                CutCandidate { time_sec: 2.0, score: 0.4 },
            ],
        }
    }

    #[test]
    fn test_valid_plan() {
        assert!(plan().validate(30.0).is_ok());
    }

    #[test]
    fn test_rejects_non_increasing_beats() {
        let mut p = plan();
        p.beats = vec![0.5, 0.5, 1.0];
        assert!(p.validate(30.0).is_err());
    }

    #[test]
    fn test_rejects_out_of_window() {
        let mut p = plan();
        p.beats.push(31.0);
        assert!(p.validate(30.0).is_err());
    }

    #[test]
    fn test_rejects_unsorted_candidates() {
        let mut p = plan();
        p.cut_candidates.reverse();
        assert!(p.validate(30.0).is_err());
    }

    #[test]
    fn test_nearest_beat() {
        let p = plan();
        assert_eq!(p.nearest_beat(1.1), Some(1.0));
        assert_eq!(p.nearest_beat(1.3), Some(1.5));
    }
}

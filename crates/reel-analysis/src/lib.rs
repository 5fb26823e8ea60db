//! Beat analysis and cut planning for ReelBeat.
//!
//! [`BeatAnalyzer`] turns a mono WAV slice into a [`reel_models::BeatPlan`]:
//! an onset envelope by spectral flux, a tempo estimate from the
//! envelope's autocorrelation, a beat grid snapped to local onsets,
//! and salience-scored cut candidates.
//!
//! [`CutPlanner`] consumes a beat plan, the clip count, and a style
//! and emits the ordered, boundary-snapped segment list the
//! `cut_and_concat` stage renders. Planning is deterministic: the
//! same inputs always produce byte-identical segments.

pub mod beats;
pub mod error;
pub mod planner;

pub use beats::{AnalyzerConfig, BeatAnalyzer};
pub use error::{AnalysisError, AnalysisResult, PlanError, PlanResult};
pub use planner::CutPlanner;

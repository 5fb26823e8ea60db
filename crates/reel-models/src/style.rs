//! Style presets and their grading parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::segment::Transition;

/// Color grade parameters applied by the `style_grade` stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorGrade {
    /// Target white point, kelvin
    pub temperature_kelvin: u32,
    /// Saturation multiplier
    pub saturation_scale: f64,
    /// Contrast multiplier
    pub contrast_scale: f64,
}

/// Named style presets (closed enumeration).
///
/// Styles are data, not code paths: each preset declares a default
/// boundary transition and a color grade. The pipeline branches on
/// style only in the cut planner's transition defaults and the
/// `style_grade` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    /// Professional, dramatic, moody
    CinematicDrama,
    /// Energetic, confident, fast-paced
    EnergeticDance,
    /// Wanderlust, luxury, peaceful
    LuxeTravel,
    /// Clean, professional, modern
    ModernMinimal,
}

impl Style {
    /// All available styles.
    pub const ALL: &'static [Style] = &[
        Style::CinematicDrama,
        Style::EnergeticDance,
        Style::LuxeTravel,
        Style::ModernMinimal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::CinematicDrama => "cinematic_drama",
            Style::EnergeticDance => "energetic_dance",
            Style::LuxeTravel => "luxe_travel",
            Style::ModernMinimal => "modern_minimal",
        }
    }

    /// Default transition placed at inter-segment boundaries.
    pub fn default_transition(&self) -> Transition {
        match self {
            Style::CinematicDrama => Transition::crossfade(500),
            Style::EnergeticDance => Transition::HARD_CUT,
            Style::LuxeTravel => Transition::crossfade(500),
            Style::ModernMinimal => Transition::crossfade(200),
        }
    }

    /// Color grade parameters for the `style_grade` stage.
    pub fn color_grade(&self) -> ColorGrade {
        match self {
            Style::CinematicDrama => ColorGrade {
                temperature_kelvin: 5600,
                saturation_scale: 0.9,
                contrast_scale: 1.15,
            },
            Style::EnergeticDance => ColorGrade {
                temperature_kelvin: 2700,
                saturation_scale: 1.2,
                contrast_scale: 1.1,
            },
            Style::LuxeTravel => ColorGrade {
                temperature_kelvin: 3200,
                saturation_scale: 1.1,
                contrast_scale: 1.05,
            },
            Style::ModernMinimal => ColorGrade {
                temperature_kelvin: 4500,
                saturation_scale: 0.9,
                contrast_scale: 1.0,
            },
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown style name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown style: {0}")]
pub struct StyleParseError(pub String);

impl FromStr for Style {
    type Err = StyleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cinematic_drama" => Ok(Style::CinematicDrama),
            "energetic_dance" => Ok(Style::EnergeticDance),
            "luxe_travel" => Ok(Style::LuxeTravel),
            "modern_minimal" => Ok(Style::ModernMinimal),
            other => Err(StyleParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::TransitionKind;

    #[test]
    fn test_parse_roundtrip() {
        for style in Style::ALL {
            assert_eq!(style.as_str().parse::<Style>().unwrap(), *style);
        }
        assert!("vaporwave".parse::<Style>().is_err());
    }

    #[test]
    fn test_transition_defaults() {
        assert_eq!(
            Style::EnergeticDance.default_transition(),
            Transition::HARD_CUT
        );
        let cinematic = Style::CinematicDrama.default_transition();
        assert_eq!(cinematic.kind, TransitionKind::Crossfade);
        assert_eq!(cinematic.duration_ms, 500);
        assert_eq!(Style::ModernMinimal.default_transition().duration_ms, 200);
    }

    #[test]
    fn test_grade_table() {
        let grade = Style::EnergeticDance.color_grade();
        assert_eq!(grade.temperature_kelvin, 2700);
        assert!((grade.saturation_scale - 1.2).abs() < f64::EPSILON);

        assert_eq!(Style::ModernMinimal.color_grade().temperature_kelvin, 4500);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Style::LuxeTravel).unwrap();
        assert_eq!(json, "\"luxe_travel\"");
    }
}

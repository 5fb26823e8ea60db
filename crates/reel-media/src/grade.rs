//! Color grade filter construction.

use reel_models::ColorGrade;

/// Temperature below which the grade adds warmth.
const WARM_BELOW_KELVIN: u32 = 4000;
/// Temperature above which the grade adds coolness.
const COOL_ABOVE_KELVIN: u32 = 5000;

/// Build the ffmpeg video filter chain for a color grade.
///
/// Temperatures below 4000 K shift shadows and midtones toward
/// red/yellow, above 5000 K toward blue; the band in between is left
/// neutral. Saturation and contrast multipliers are applied only when
/// they deviate from 1.0. Returns `null` when the grade is a no-op so
/// the filter chain stays valid.
pub fn build_grade_filter(grade: &ColorGrade) -> String {
    let mut filters: Vec<String> = Vec::new();

    if grade.temperature_kelvin < WARM_BELOW_KELVIN {
        filters.push(
            "colorbalance=rs=0.1:gs=-0.05:bs=-0.15:rm=0.05:gm=-0.02:bm=-0.1".to_string(),
        );
    } else if grade.temperature_kelvin > COOL_ABOVE_KELVIN {
        filters.push(
            "colorbalance=rs=-0.1:gs=0.02:bs=0.15:rm=-0.05:gm=0.01:bm=0.1".to_string(),
        );
    }

    if (grade.saturation_scale - 1.0).abs() > f64::EPSILON {
        filters.push(format!("hue=s={}", grade.saturation_scale));
    }

    if (grade.contrast_scale - 1.0).abs() > f64::EPSILON {
        filters.push(format!("eq=contrast={}", grade.contrast_scale));
    }

    if filters.is_empty() {
        "null".to_string()
    } else {
        filters.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::Style;

    #[test]
    fn test_warm_grade() {
        let filter = build_grade_filter(&Style::EnergeticDance.color_grade());
        assert!(filter.contains("colorbalance=rs=0.1"));
        assert!(filter.contains("hue=s=1.2"));
        assert!(filter.contains("eq=contrast=1.1"));
    }

    #[test]
    fn test_cool_grade() {
        let filter = build_grade_filter(&Style::CinematicDrama.color_grade());
        assert!(filter.contains("colorbalance=rs=-0.1"));
        assert!(filter.contains("hue=s=0.9"));
    }

    #[test]
    fn test_neutral_band_has_no_colorbalance() {
        let filter = build_grade_filter(&Style::ModernMinimal.color_grade());
        assert!(!filter.contains("colorbalance"));
        // saturation 0.9 still applies
        assert!(filter.contains("hue=s=0.9"));
        // contrast 1.0 is skipped
        assert!(!filter.contains("eq=contrast"));
    }

    #[test]
    fn test_identity_grade_is_null() {
        let grade = ColorGrade {
            temperature_kelvin: 4500,
            saturation_scale: 1.0,
            contrast_scale: 1.0,
        };
        assert_eq!(build_grade_filter(&grade), "null");
    }
}

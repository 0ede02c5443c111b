//! Watermark geometry and tunable detection thresholds.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Watermark size classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkSize {
    /// 48x48 logo (images where either dimension is at or below the cut-over).
    Small,
    /// 96x96 logo (images where both dimensions exceed the cut-over).
    Large,
}

impl WatermarkSize {
    /// Side length of the square logo region in pixels.
    #[must_use]
    pub const fn pixels(self) -> u32 {
        match self {
            WatermarkSize::Small => 48,
            WatermarkSize::Large => 96,
        }
    }
}

/// Inclusive distance range between the logo and an image edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginRange {
    /// Closest the logo may sit to the edge.
    pub min: u32,
    /// Farthest the logo may sit from the edge.
    pub max: u32,
}

/// Search geometry for one image, derived from its dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkConfig {
    /// Selected logo size.
    pub size: WatermarkSize,
    /// Logo side length in pixels.
    pub logo_size: u32,
    /// Minimum gap between the logo and the right edge.
    pub min_margin_right: u32,
    /// Maximum gap between the logo and the right edge.
    pub max_margin_right: u32,
    /// Minimum gap between the logo and the bottom edge.
    pub min_margin_bottom: u32,
    /// Maximum gap between the logo and the bottom edge.
    pub max_margin_bottom: u32,
}

/// Tunable constants for size selection, search window and confidence gate.
///
/// Every field has a default, so a tuning file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tuning {
    /// Both dimensions must exceed this for the large logo to be used.
    pub large_image_threshold: u32,
    /// Margins searched for the small logo.
    pub small_margins: MarginRange,
    /// Margins searched for the large logo.
    pub large_margins: MarginRange,
    /// Minimum normalized correlation to accept a match.
    pub min_correlation: f64,
    /// Minimum mean darkening (luma, 0-255 scale) to accept a match.
    pub min_darkening: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            large_image_threshold: 1024,
            small_margins: MarginRange { min: 4, max: 64 },
            large_margins: MarginRange { min: 12, max: 128 },
            min_correlation: 0.28,
            min_darkening: 4.0,
        }
    }
}

impl Tuning {
    /// Read a JSON tuning file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be read and
    /// [`crate::Error::Config`] if it is not valid tuning JSON.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Determine watermark size based on image dimensions.
    ///
    /// - **Large**: both width AND height exceed the threshold
    /// - **Small**: otherwise (including exactly 1024x1024 by default)
    #[must_use]
    pub fn watermark_size_for(&self, width: u32, height: u32) -> WatermarkSize {
        if width > self.large_image_threshold && height > self.large_image_threshold {
            WatermarkSize::Large
        } else {
            WatermarkSize::Small
        }
    }

    /// Search geometry for an image, optionally forcing the logo size.
    #[must_use]
    pub fn config_for(
        &self,
        width: u32,
        height: u32,
        force_size: Option<WatermarkSize>,
    ) -> WatermarkConfig {
        let size = force_size.unwrap_or_else(|| self.watermark_size_for(width, height));
        let margins = match size {
            WatermarkSize::Small => self.small_margins,
            WatermarkSize::Large => self.large_margins,
        };
        WatermarkConfig {
            size,
            logo_size: size.pixels(),
            min_margin_right: margins.min,
            max_margin_right: margins.max,
            min_margin_bottom: margins.min,
            max_margin_bottom: margins.max,
        }
    }

    /// Whether a match with these scores passes the confidence gate.
    #[must_use]
    pub fn accepts(&self, correlation: f64, darkening: f64) -> bool {
        correlation >= self.min_correlation && darkening >= self.min_darkening
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_size_small_when_either_dim_lte_1024() {
        let tuning = Tuning::default();
        assert_eq!(tuning.watermark_size_for(800, 600), WatermarkSize::Small);
        assert_eq!(tuning.watermark_size_for(1024, 1024), WatermarkSize::Small);
        assert_eq!(tuning.watermark_size_for(2048, 512), WatermarkSize::Small);
        assert_eq!(tuning.watermark_size_for(512, 2048), WatermarkSize::Small);
    }

    #[test]
    fn watermark_size_large_when_both_dims_gt_1024() {
        let tuning = Tuning::default();
        assert_eq!(tuning.watermark_size_for(1025, 1025), WatermarkSize::Large);
        assert_eq!(tuning.watermark_size_for(2048, 2048), WatermarkSize::Large);
    }

    #[test]
    fn config_uses_per_size_margins() {
        let tuning = Tuning::default();

        let small = tuning.config_for(500, 500, None);
        assert_eq!(small.logo_size, 48);
        assert_eq!((small.min_margin_right, small.max_margin_right), (4, 64));
        assert_eq!((small.min_margin_bottom, small.max_margin_bottom), (4, 64));

        let large = tuning.config_for(2000, 2000, None);
        assert_eq!(large.logo_size, 96);
        assert_eq!((large.min_margin_right, large.max_margin_right), (12, 128));
    }

    #[test]
    fn force_size_overrides_heuristic() {
        let tuning = Tuning::default();
        let config = tuning.config_for(300, 300, Some(WatermarkSize::Large));
        assert_eq!(config.size, WatermarkSize::Large);
        assert_eq!(config.logo_size, 96);
    }

    #[test]
    fn gate_requires_both_scores() {
        let tuning = Tuning::default();
        assert!(tuning.accepts(0.5, 10.0));
        assert!(!tuning.accepts(0.2, 10.0));
        assert!(!tuning.accepts(0.9, 1.0));
    }

    #[test]
    fn partial_tuning_json_keeps_defaults() {
        let tuning: Tuning =
            serde_json::from_str(r#"{"min_correlation": 0.5, "large_margins": {"min": 8, "max": 96}}"#)
                .unwrap();
        assert!((tuning.min_correlation - 0.5).abs() < f64::EPSILON);
        assert_eq!(tuning.large_margins, MarginRange { min: 8, max: 96 });
        assert_eq!(tuning.small_margins, Tuning::default().small_margins);
        assert!((tuning.min_darkening - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_tuning_fields_are_rejected() {
        let parsed: std::result::Result<Tuning, _> = serde_json::from_str(r#"{"min_corr": 0.5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn tuning_file_is_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuning.json");
        std::fs::write(&path, r#"{"large_image_threshold": 2048}"#).unwrap();

        let tuning = Tuning::from_json_file(&path).unwrap();
        assert_eq!(tuning.large_image_threshold, 2048);
        assert_eq!(tuning.watermark_size_for(2000, 2000), WatermarkSize::Small);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Tuning::from_json_file(&path),
            Err(crate::Error::Config(_))
        ));
    }
}

// THEORY:
// All tunable thresholds of the engine live in one explicit value object. Nothing
// is read from ambient state: the pipeline, the validator and the analyzers each
// receive the section they need when they are constructed.
//
// The file format is TOML. Every field has a default, so a config file only needs to
// name the values it overrides.

use crate::error::{GaitError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lowest and highest frame rates the front-ends ever accepted.
pub const FPS_RANGE: (f64, f64) = (1.0, 1000.0);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitConfig {
    pub extraction: ExtractionConfig,
    pub validation: ValidationConfig,
    pub kinematics: KinematicsConfig,
    pub oscillation: OscillationConfig,
}

/// Segmentation and box-discovery parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Contrast used when no interactive selection happens.
    pub default_contrast: f64,
    pub contrast_min: f64,
    pub contrast_max: f64,
    /// Width of the solid border added around every cropped frame.
    pub blank_border: u32,
    /// Padding added on each side of the final movement box.
    pub security_border: u32,
    /// Area band (px²) for the fish contour.
    pub fish_area_min: f64,
    pub fish_area_max: f64,
    /// Area band (px²) for a per-frame movement candidate box.
    pub box_area_min: f64,
    pub box_area_max: f64,
    /// Relative spread around the median intensity used by the automatic Canny.
    pub canny_sigma: f32,
    /// Number of frames after which the background model stops speeding up its learning.
    pub background_history: u32,
    /// Absolute intensity difference above which a pixel counts as foreground.
    pub background_threshold: f32,
    /// Write failed frames to the annotated output as well.
    pub write_failed_frames: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            default_contrast: 1.0,
            contrast_min: 0.0,
            contrast_max: 3.0,
            blank_border: 10,
            security_border: 20,
            fish_area_min: 8000.0,
            fish_area_max: 15000.0,
            box_area_min: 20000.0,
            box_area_max: 50000.0,
            canny_sigma: 0.33,
            background_history: 500,
            background_threshold: 25.0,
            write_failed_frames: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum Hu-moment distance between consecutive contours.
    pub shape_distance_max: f64,
    /// Maximum vertical spread (px) of skeleton points sharing one column.
    pub branch_tolerance_px: i32,
    /// Share of the total frame count that may fail overall.
    pub max_failure_ratio: f64,
    /// Share of the total frame count that may fail in a row.
    pub max_consecutive_failure_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            shape_distance_max: 0.1,
            branch_tolerance_px: 3,
            max_failure_ratio: 0.10,
            max_consecutive_failure_ratio: 0.05,
        }
    }
}

/// Which end of the x-sorted skeleton is the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadSide {
    Left,
    Right,
}

/// How a frame index becomes a time stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBase {
    /// `index * (total_frames / fps)`, the historical conversion.
    RunDuration,
    /// `index * 1000 / fps`, one frame period in milliseconds.
    FramePeriod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    pub proportion_joint: f64,
    pub proportion_torsion: f64,
    pub head_side: HeadSide,
    /// Locate the torsion point and compute the alpha and gamma series.
    pub track_torsion: bool,
    pub time_base: TimeBase,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            proportion_joint: 1.0 / 3.0,
            proportion_torsion: 1.0 / 2.0,
            head_side: HeadSide::Left,
            track_torsion: true,
            time_base: TimeBase::RunDuration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscillationConfig {
    /// Width (samples) of the centered moving-average kernel.
    pub smoothing_window: usize,
    /// Stride (samples) between spline knots.
    pub knot_stride: usize,
    /// Extrema closer than this (ms) may be noise.
    pub noise_time_ms: f64,
    /// Extrema whose values differ by less than this share of the series range may be noise.
    pub noise_value_ratio: f64,
}

impl Default for OscillationConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 9,
            knot_stride: 15,
            noise_time_ms: 20.0,
            noise_value_ratio: 0.05,
        }
    }
}

impl GaitConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GaitConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field invariants every component relies on.
    pub fn validate(&self) -> Result<()> {
        let e = &self.extraction;
        if !(e.contrast_min <= e.default_contrast && e.default_contrast <= e.contrast_max) {
            return Err(invalid(format!(
                "default contrast {} outside [{}, {}]",
                e.default_contrast, e.contrast_min, e.contrast_max
            )));
        }
        if e.fish_area_min >= e.fish_area_max {
            return Err(invalid(format!(
                "fish area band [{}, {}] is empty",
                e.fish_area_min, e.fish_area_max
            )));
        }
        if e.box_area_min >= e.box_area_max {
            return Err(invalid(format!(
                "movement box area band [{}, {}] is empty",
                e.box_area_min, e.box_area_max
            )));
        }
        if e.background_history == 0 {
            return Err(invalid("background history must be at least one frame".into()));
        }

        let v = &self.validation;
        for (name, ratio) in [
            ("max_failure_ratio", v.max_failure_ratio),
            ("max_consecutive_failure_ratio", v.max_consecutive_failure_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(invalid(format!("{name} {ratio} outside (0, 1]")));
            }
        }

        let k = &self.kinematics;
        for (name, p) in [
            ("proportion_joint", k.proportion_joint),
            ("proportion_torsion", k.proportion_torsion),
        ] {
            if !(p > 0.0 && p < 1.0) {
                return Err(invalid(format!("{name} {p} outside (0, 1)")));
            }
        }

        let o = &self.oscillation;
        if o.smoothing_window == 0 || o.knot_stride == 0 {
            return Err(invalid("smoothing window and knot stride must be positive".into()));
        }
        Ok(())
    }

    pub fn check_contrast(&self, contrast: f64) -> Result<f64> {
        let e = &self.extraction;
        if contrast.is_finite() && contrast >= e.contrast_min && contrast <= e.contrast_max {
            Ok(contrast)
        } else {
            Err(invalid(format!(
                "contrast {contrast} outside [{}, {}]",
                e.contrast_min, e.contrast_max
            )))
        }
    }
}

pub fn check_fps(fps: f64) -> Result<f64> {
    if fps >= FPS_RANGE.0 && fps <= FPS_RANGE.1 {
        Ok(fps)
    } else {
        Err(invalid(format!(
            "the fps value must be in [{}, {}], got {fps}",
            FPS_RANGE.0, FPS_RANGE.1
        )))
    }
}

fn invalid(msg: String) -> GaitError {
    GaitError::InvalidConfig(msg)
}

//! Run-wide settings with their defaults.

use crate::camera::Resolution;
use crate::stitch::DEFAULT_BLENDING_THRESHOLD;
use crate::synch::DEFAULT_MAX_SHIFT;
use crate::util::{self, UtilError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Panorama and synchronization settings.
///
/// Every field is optional in the YAML file; missing ones keep their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanoConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub tile_size: u32,
    pub fps: u32,
    pub blending_threshold: f64,
    /// Hz
    pub audio_sample_rate: u32,
    /// Seconds, used when a video list does not set `MaxShift`.
    pub default_max_shift: f64,
    /// Global time in seconds at which frame sampling starts.
    pub sample_start_time: f64,
}

impl Default for PanoConfig {
    fn default() -> Self {
        Self {
            canvas_width: 2000,
            canvas_height: 1000,
            tile_size: 10,
            fps: 30,
            blending_threshold: DEFAULT_BLENDING_THRESHOLD,
            audio_sample_rate: 4000,
            default_max_shift: DEFAULT_MAX_SHIFT,
            sample_start_time: 5.0,
        }
    }
}

fn invalid(field: &str, reason: String) -> UtilError {
    UtilError::InvalidField {
        field: field.to_string(),
        reason,
    }
}

impl PanoConfig {
    pub fn load_from_yaml(path: &Path) -> Result<Self, UtilError> {
        util::require_file(path)?;
        let contents = fs::read_to_string(path)?;
        let config: Self =
            serde_yaml::from_str(&contents).map_err(|e| UtilError::YamlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), UtilError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(invalid(
                "canvas",
                format!("must be non-empty, got {}x{}", self.canvas_width, self.canvas_height),
            ));
        }
        if self.tile_size == 0 {
            return Err(invalid("tile_size", "must be positive".to_string()));
        }
        if self.fps == 0 {
            return Err(invalid("fps", "must be positive".to_string()));
        }
        if !(0.0..=0.5).contains(&self.blending_threshold) {
            return Err(invalid(
                "blending_threshold",
                format!("must lie in [0, 0.5], got {}", self.blending_threshold),
            ));
        }
        if self.audio_sample_rate == 0 {
            return Err(invalid("audio_sample_rate", "must be positive".to_string()));
        }
        if self.default_max_shift.is_nan() || self.default_max_shift <= 0.0 {
            return Err(invalid(
                "default_max_shift",
                format!("must be positive, got {}", self.default_max_shift),
            ));
        }
        if !self.sample_start_time.is_finite() || self.sample_start_time < 0.0 {
            return Err(invalid(
                "sample_start_time",
                format!("must be a non-negative time, got {}", self.sample_start_time),
            ));
        }
        Ok(())
    }

    pub fn canvas(&self) -> Resolution {
        Resolution::new(self.canvas_width, self.canvas_height)
    }
}

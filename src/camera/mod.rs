//! Camera models used to map panorama rays onto fisheye sensors.
//!
//! The [`CameraModel`] trait is the seam the stitching engine works against.
//! [`OcamModel`] implements it for omnidirectional cameras calibrated with an
//! inverse polynomial, and [`CameraRig`] holds every calibrated camera of a
//! multi-camera rig keyed by name.

use nalgebra::{Matrix2xX, Matrix3xX, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod ocam;
pub mod rig;

pub use ocam::{is_valid_pixel, OcamModel, OcamParams, INVALID_PIXEL};
pub use rig::CameraRig;

/// Width and height of an image, in pixels.
///
/// Used both for camera sensor frames and for the panorama canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` if `point` lies inside `[0, width) x [0, height)`.
    ///
    /// Non-finite coordinates (including the [`INVALID_PIXEL`] sentinel) are
    /// always out of bounds.
    pub fn contains(&self, point: &Vector2<f64>) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x < self.width as f64
            && point.y < self.height as f64
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Resolution must be non-zero, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Duplicate camera name in calibration: {0}")]
    DuplicateCamera(String),
    #[error("Unknown camera: {0}")]
    UnknownCamera(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Trait defining the projection functionality the stitcher needs from a camera.
pub trait CameraModel {
    /// Identifier of the camera inside its rig.
    fn name(&self) -> &str;

    /// Project a 3D point given in camera coordinates to a pixel.
    ///
    /// Returns `None` for points the camera cannot see (behind the sensor).
    fn project(&self, point_3d: &Vector3<f64>) -> Option<Vector2<f64>>;

    /// Project world points (one per column) to pixels (one per column).
    ///
    /// Columns that cannot be projected hold [`INVALID_PIXEL`].
    fn project_world_points(&self, points_3d: &Matrix3xX<f64>) -> Matrix2xX<f64>;

    /// Optical center `(u0, v0)` on the sensor.
    fn optical_center(&self) -> Vector2<f64>;

    /// Sensor frame size.
    fn get_resolution(&self) -> Resolution;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_optical_center(u0: f64, v0: f64) -> Result<(), CameraModelError> {
        if !u0.is_finite() || !v0.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_resolution(resolution: &Resolution) -> Result<(), CameraModelError> {
        if resolution.is_empty() {
            return Err(CameraModelError::InvalidResolution {
                width: resolution.width,
                height: resolution.height,
            });
        }
        Ok(())
    }

    pub fn validate_coefficients(name: &str, coefficients: &[f64]) -> Result<(), CameraModelError> {
        if let Some(index) = coefficients.iter().position(|c| !c.is_finite()) {
            return Err(CameraModelError::InvalidParams(format!(
                "{name}[{index}] is not finite"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_contains_rejects_sentinel_and_nan() {
        let resolution = Resolution::new(640, 480);
        assert!(resolution.contains(&Vector2::new(0.0, 0.0)));
        assert!(resolution.contains(&Vector2::new(639.9, 479.9)));
        assert!(!resolution.contains(&Vector2::new(640.0, 10.0)));
        assert!(!resolution.contains(&Vector2::new(-0.1, 10.0)));
        assert!(!resolution.contains(&INVALID_PIXEL));
        assert!(!resolution.contains(&Vector2::new(f64::NAN, 1.0)));
    }

    #[test]
    fn test_validate_resolution() {
        assert!(validation::validate_resolution(&Resolution::new(10, 10)).is_ok());
        assert!(matches!(
            validation::validate_resolution(&Resolution::new(0, 10)),
            Err(CameraModelError::InvalidResolution { width: 0, height: 10 })
        ));
    }
}

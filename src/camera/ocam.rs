//! Implements the omnidirectional (OCam) fisheye camera model.
//!
//! The model maps the incidence angle of a ray to a radial distance on the
//! sensor through a fitted inverse polynomial, then applies an affine
//! correction for sensor-plane skew and aspect:
//!
//! ```text
//! theta = atan2(-z, sqrt(x² + y²))
//! rho   = Σ inverse_poly[i] * theta^i
//! (u, v) = (x, y) * rho / sqrt(x² + y²)
//! pixel = (c*u + d*v + u0, e*u + v + v0)
//! ```
//!
//! Every camera of a rig also carries an extrinsic rotation (axis-angle)
//! relating it to the rig frame in which panorama rays are expressed.

use crate::camera::{validation, CameraModel, CameraModelError, Resolution};
use crate::geometry::evaluate_polynomial;
use nalgebra::{Matrix2xX, Matrix3xX, Matrix4, Rotation3, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Sentinel stored in batch projection results for points the camera cannot see.
pub const INVALID_PIXEL: Vector2<f64> = Vector2::new(f64::MAX, f64::MAX);

/// Smallest xy-norm used when a point lies on the optical axis.
const MIN_XY_NORM: f64 = 1e-14;

/// Returns `false` for the [`INVALID_PIXEL`] sentinel and any non-finite pixel.
pub fn is_valid_pixel(pixel: &Vector2<f64>) -> bool {
    pixel.x.is_finite() && pixel.y.is_finite() && *pixel != INVALID_PIXEL
}

/// Calibration parameters of one omnidirectional camera, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcamParams {
    pub name: String,
    pub resolution: Resolution,
    /// Optical center x on the sensor.
    pub u0: f64,
    /// Optical center y on the sensor.
    pub v0: f64,
    /// Affine coefficients `c`, `d`, `e`.
    pub affine: [f64; 3],
    /// Forward polynomial (radius to angle). Not used for projection.
    pub poly: Vec<f64>,
    /// Inverse polynomial (angle to radius), lowest degree first.
    pub inverse_poly: Vec<f64>,
    /// `[rx, ry, rz, tx, ty, tz]`: axis-angle rotation then translation.
    pub extrinsic: Vec<f64>,
}

/// An immutable, validated omnidirectional camera.
///
/// # Extrinsics
///
/// The camera-to-rig transform is built from the rotation part of the
/// extrinsic vector only. The translation is kept in [`OcamModel::params`]
/// but zeroed in the transform: all cameras are treated as sharing the rig
/// center, so panorama rays are pure directions.
///
/// # Examples
///
/// ```rust
/// use fisheye_pano::camera::{CameraModel, OcamModel, OcamParams, Resolution};
/// use nalgebra::Vector3;
///
/// let model = OcamModel::new(OcamParams {
///     name: "front".to_string(),
///     resolution: Resolution::new(100, 100),
///     u0: 50.0,
///     v0: 50.0,
///     affine: [1.0, 0.0, 0.0],
///     poly: vec![],
///     inverse_poly: vec![45.0, 90.0 / std::f64::consts::PI],
///     extrinsic: vec![0.0; 6],
/// })
/// .unwrap();
///
/// // A point on the optical axis lands on the optical center.
/// let pixel = model.project(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
/// assert!((pixel.x - 50.0).abs() < 1e-9 && (pixel.y - 50.0).abs() < 1e-9);
///
/// // A point behind the camera has no projection.
/// assert!(model.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct OcamModel {
    params: OcamParams,
    /// Camera-to-rig transform, rotation only.
    transform: Matrix4<f64>,
    /// Inverse of `transform`, cached for batch projection.
    rig_to_camera: Matrix4<f64>,
}

impl OcamModel {
    /// Creates a validated model from calibration parameters.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidParams`] if the extrinsic vector does not
    ///   hold 6 values, the inverse polynomial is empty, or any coefficient is
    ///   not finite.
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidResolution`]
    pub fn new(params: OcamParams) -> Result<Self, CameraModelError> {
        if params.extrinsic.len() != 6 {
            return Err(CameraModelError::InvalidParams(format!(
                "camera '{}': extrinsic must hold 6 values, got {}",
                params.name,
                params.extrinsic.len()
            )));
        }
        validation::validate_coefficients("extrinsic", &params.extrinsic)?;

        let axis_angle = Vector3::new(
            params.extrinsic[0],
            params.extrinsic[1],
            params.extrinsic[2],
        );
        let rotation = Rotation3::from_scaled_axis(axis_angle);
        let transform = rotation.to_homogeneous();
        let rig_to_camera = rotation.inverse().to_homogeneous();

        let model = OcamModel {
            params,
            transform,
            rig_to_camera,
        };
        model.validate_params()?;
        Ok(model)
    }

    pub fn params(&self) -> &OcamParams {
        &self.params
    }

    /// Camera-to-rig 4x4 homogeneous transform. The translation column is zero.
    pub fn transform(&self) -> &Matrix4<f64> {
        &self.transform
    }

    pub fn inverse_poly(&self) -> &[f64] {
        &self.params.inverse_poly
    }

    pub fn poly(&self) -> &[f64] {
        &self.params.poly
    }

    /// Projects a single point given in rig coordinates.
    pub fn project_world_point(&self, point_3d: &Vector3<f64>) -> Option<Vector2<f64>> {
        let camera_point = self.rig_to_camera * point_3d.push(1.0);
        self.project(&camera_point.xyz())
    }
}

impl CameraModel for OcamModel {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn project(&self, point_3d: &Vector3<f64>) -> Option<Vector2<f64>> {
        let (x, y, z) = (point_3d.x, point_3d.y, point_3d.z);
        if z < 0.0 {
            return None;
        }

        let mut norm = (x * x + y * y).sqrt();
        if norm == 0.0 {
            norm = MIN_XY_NORM;
        }

        let theta = (-z).atan2(norm);
        let rho = evaluate_polynomial(&self.params.inverse_poly, theta);

        let u = x * rho / norm;
        let v = y * rho / norm;

        let [c, d, e] = self.params.affine;
        Some(Vector2::new(
            c * u + d * v + self.params.u0,
            e * u + v + self.params.v0,
        ))
    }

    fn project_world_points(&self, points_3d: &Matrix3xX<f64>) -> Matrix2xX<f64> {
        let mut pixels = Matrix2xX::zeros(points_3d.ncols());
        for (i, point) in points_3d.column_iter().enumerate() {
            let homogeneous = Vector4::new(point[0], point[1], point[2], 1.0);
            let camera_point = self.rig_to_camera * homogeneous;
            let pixel = self.project(&camera_point.xyz()).unwrap_or(INVALID_PIXEL);
            pixels.set_column(i, &pixel);
        }
        pixels
    }

    fn optical_center(&self) -> Vector2<f64> {
        Vector2::new(self.params.u0, self.params.v0)
    }

    fn get_resolution(&self) -> Resolution {
        self.params.resolution
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_optical_center(self.params.u0, self.params.v0)?;
        validation::validate_resolution(&self.params.resolution)?;
        if self.params.inverse_poly.is_empty() {
            return Err(CameraModelError::InvalidParams(format!(
                "camera '{}': inverse polynomial is empty",
                self.params.name
            )));
        }
        validation::validate_coefficients("inverse_poly", &self.params.inverse_poly)?;
        validation::validate_coefficients("poly", &self.params.poly)?;
        validation::validate_coefficients("affine", &self.params.affine)?;
        Ok(())
    }
}

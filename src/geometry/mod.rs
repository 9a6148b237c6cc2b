//! Equirectangular canvas geometry and polynomial helpers.

use crate::camera::Resolution;
use nalgebra::{Vector2, Vector3};
use std::f64::consts::{PI, TAU};

/// Radius of the sphere canvas pixels are lifted onto before projection.
pub const SPHERE_RADIUS: f64 = 10.0;

/// Evaluate `Σ coefficients[i] * x^i` with Horner's scheme.
///
/// Coefficients are ordered from the lowest degree to the highest. An empty
/// slice evaluates to `0.0`.
pub fn evaluate_polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients
        .iter()
        .rev()
        .fold(0.0, |accumulator, coefficient| accumulator * x + coefficient)
}

/// Map a canvas pixel to a direction on a sphere of the given radius.
///
/// # Arguments
///
/// * `pixel` - Pixel position on the equirectangular canvas
/// * `canvas` - Canvas size; columns span azimuth `[0, 2π)`, rows span
///   elevation `[-π/2, π/2]`
/// * `radius` - Length of the returned vector
///
/// # Returns
///
/// `(r·cos(el)·sin(az), r·sin(el), r·cos(el)·cos(az))`
pub fn canvas_pixel_to_sphere(pixel: &Vector2<f64>, canvas: &Resolution, radius: f64) -> Vector3<f64> {
    let elevation = PI * (pixel.y / canvas.height as f64 - 0.5);
    let azimuth = TAU * pixel.x / canvas.width as f64;

    let (sin_el, cos_el) = elevation.sin_cos();
    let (sin_az, cos_az) = azimuth.sin_cos();
    Vector3::new(
        radius * cos_el * sin_az,
        radius * sin_el,
        radius * cos_el * cos_az,
    )
}

/// Inverse of [`canvas_pixel_to_sphere`], for any non-zero direction.
pub fn sphere_to_canvas_pixel(direction: &Vector3<f64>, canvas: &Resolution) -> Vector2<f64> {
    let radius = direction.norm();
    let elevation = (direction.y / radius).clamp(-1.0, 1.0).asin();
    let azimuth = direction.x.atan2(direction.z).rem_euclid(TAU);

    Vector2::new(
        azimuth / TAU * canvas.width as f64,
        (elevation / PI + 0.5) * canvas.height as f64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_evaluate_polynomial() {
        assert_eq!(evaluate_polynomial(&[1.0, 0.0, 2.0], 2.0), 9.0);
        assert_eq!(evaluate_polynomial(&[], 3.0), 0.0);
        assert_eq!(evaluate_polynomial(&[4.0], 100.0), 4.0);

        // Linear in the coefficients
        let a = [0.5, -1.0, 0.25, 2.0];
        let b = [1.5, 3.0, -0.75, 0.1];
        let sum: Vec<f64> = a.iter().zip(&b).map(|(x, y)| 2.0 * x + y).collect();
        for theta in [-1.2, -0.3, 0.0, 0.7, 1.5] {
            assert_relative_eq!(
                evaluate_polynomial(&sum, theta),
                2.0 * evaluate_polynomial(&a, theta) + evaluate_polynomial(&b, theta),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_canvas_pixel_to_sphere_known_directions() {
        let canvas = Resolution::new(400, 200);

        // Center row, first column looks along +z.
        let forward = canvas_pixel_to_sphere(&Vector2::new(0.0, 100.0), &canvas, 1.0);
        assert_relative_eq!(forward, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);

        // A quarter turn in azimuth looks along +x.
        let right = canvas_pixel_to_sphere(&Vector2::new(100.0, 100.0), &canvas, 2.0);
        assert_relative_eq!(right, Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-12);

        // Top row is the -y pole.
        let pole = canvas_pixel_to_sphere(&Vector2::new(37.0, 0.0), &canvas, 1.0);
        assert_relative_eq!(pole.y, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_round_trip() {
        let canvas = Resolution::new(2000, 1000);
        for radius in [1.0, SPHERE_RADIUS] {
            for x in [0.5, 13.0, 999.0, 1500.25, 1999.5] {
                for y in [0.5, 250.0, 500.0, 777.7, 999.5] {
                    let pixel = Vector2::new(x, y);
                    let direction = canvas_pixel_to_sphere(&pixel, &canvas, radius);
                    assert_relative_eq!(direction.norm(), radius, epsilon = 1e-9);
                    let back = sphere_to_canvas_pixel(&direction, &canvas);
                    assert_relative_eq!(back, pixel, epsilon = 1e-6);
                }
            }
        }
    }
}

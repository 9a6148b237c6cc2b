//! Piecewise-bilinear warp of one canvas tile onto one camera frame.
//!
//! Only the four tile corners go through the exact sphere and camera
//! projection. Every pixel inside the tile samples the source frame at the
//! bilinear interpolation of the four projected corners:
//!
//! ```text
//! A ---- B
//! |  pt  |     pt = (1-ay)·((1-ax)·A + ax·B) + ay·((1-ax)·C + ax·D)
//! C ---- D
//! ```

use crate::camera::{CameraModel, Resolution};
use crate::geometry::{canvas_pixel_to_sphere, SPHERE_RADIUS};
use crate::stitch::weights::{NormalizedWeightMap, RawWeightMap};
use crate::stitch::StitchError;
use image::RgbImage;
use nalgebra::{Matrix3xX, Vector2};

/// Half-width of the weight band around 0.5 where two cameras are mixed.
pub const DEFAULT_BLENDING_THRESHOLD: f64 = 0.1;

/// Inclusive pixel rectangle on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl TileRect {
    /// Tile `(row, col)` of a `tile_size` grid, clipped to the canvas.
    pub fn new(row: u32, col: u32, tile_size: u32, canvas: &Resolution) -> Result<Self, StitchError> {
        let x1 = col * tile_size;
        let y1 = row * tile_size;
        if tile_size == 0 || x1 >= canvas.width || y1 >= canvas.height {
            return Err(StitchError::InvalidTile { row, col, tile_size });
        }
        Ok(Self {
            x1,
            y1,
            x2: (x1 + tile_size).min(canvas.width) - 1,
            y2: (y1 + tile_size).min(canvas.height) - 1,
        })
    }

    /// Canvas positions of the A, B, C, D corners.
    pub fn corners(&self) -> [Vector2<f64>; 4] {
        let (x1, y1, x2, y2) = (self.x1 as f64, self.y1 as f64, self.x2 as f64, self.y2 as f64);
        [
            Vector2::new(x1, y1),
            Vector2::new(x2, y1),
            Vector2::new(x1, y2),
            Vector2::new(x2, y2),
        ]
    }
}

/// Project the tile corners into the camera frame through a sphere of `radius`.
///
/// Corners the camera cannot see hold [`crate::camera::INVALID_PIXEL`].
pub fn project_tile_corners<C: CameraModel>(
    camera: &C,
    rect: &TileRect,
    canvas: &Resolution,
    radius: f64,
) -> [Vector2<f64>; 4] {
    let sphere_points: Vec<_> = rect
        .corners()
        .iter()
        .map(|corner| canvas_pixel_to_sphere(corner, canvas, radius))
        .collect();
    let pixels = camera.project_world_points(&Matrix3xX::from_columns(&sphere_points));
    [0usize, 1, 2, 3].map(|i| Vector2::new(pixels[(0, i)], pixels[(1, i)]))
}

#[derive(Debug, Clone)]
pub struct Mesh {
    rect: TileRect,
    /// A (top-left), B (top-right), C (bottom-left), D (bottom-right).
    corners: [Vector2<f64>; 4],
    blending_threshold: f64,
}

impl Mesh {
    /// Build tile `(row, col)` for `camera` and write its raw weights.
    ///
    /// The weight of a pixel is `1/rho`, the inverse distance of its sample
    /// position to the optical center, or `1` on the center itself. Samples
    /// outside the frame weigh `0`.
    pub fn new<C: CameraModel>(
        row: u32,
        col: u32,
        tile_size: u32,
        canvas: &Resolution,
        camera: &C,
        blending_threshold: f64,
        weights: &mut RawWeightMap,
    ) -> Result<Self, StitchError> {
        let rect = TileRect::new(row, col, tile_size, canvas)?;
        let mesh = Self {
            rect,
            corners: project_tile_corners(camera, &rect, canvas, SPHERE_RADIUS),
            blending_threshold,
        };

        let frame = camera.get_resolution();
        let center = camera.optical_center();
        for y in rect.y1..=rect.y2 {
            for x in rect.x1..=rect.x2 {
                let pt = mesh.sample_position(x, y);
                let rho = (pt - center).norm();
                let weight = if rho == 0.0 {
                    1.0
                } else if frame.contains(&pt) {
                    1.0 / rho
                } else {
                    0.0
                };
                weights.set(x, y, weight);
            }
        }
        Ok(mesh)
    }

    pub fn rect(&self) -> &TileRect {
        &self.rect
    }

    pub fn corners(&self) -> &[Vector2<f64>; 4] {
        &self.corners
    }

    /// `true` if at least one corner lands inside the camera frame.
    pub fn check_validity<C: CameraModel>(&self, camera: &C) -> bool {
        let frame = camera.get_resolution();
        self.corners.iter().any(|corner| frame.contains(corner))
    }

    /// Source-frame position sampled for canvas pixel `(x, y)` of this tile.
    pub fn sample_position(&self, x: u32, y: u32) -> Vector2<f64> {
        let a_x = interpolation_factor(x, self.rect.x1, self.rect.x2);
        let a_y = interpolation_factor(y, self.rect.y1, self.rect.y2);
        let [a, b, c, d] = self.corners;
        (1.0 - a_y) * ((1.0 - a_x) * a + a_x * b) + a_y * ((1.0 - a_x) * c + a_x * d)
    }

    /// Paint the tile onto a full canvas.
    pub fn paint(&self, canvas: &mut RgbImage, frame: &RgbImage, weights: &NormalizedWeightMap) {
        let width = canvas.width();
        let buffer: &mut [u8] = &mut *canvas;
        self.paint_band(buffer, 0, width, frame, weights);
    }

    /// Paint the part of the tile that falls into a horizontal canvas band.
    ///
    /// `band` holds whole RGB rows of a `canvas_width` wide canvas, starting
    /// at canvas row `band_y0`.
    pub fn paint_band(
        &self,
        band: &mut [u8],
        band_y0: u32,
        canvas_width: u32,
        frame: &RgbImage,
        weights: &NormalizedWeightMap,
    ) {
        let frame_size = Resolution::new(frame.width(), frame.height());
        if self.corners.iter().all(|corner| !frame_size.contains(corner)) {
            return;
        }

        let stride = canvas_width as usize * 3;
        let band_rows = (band.len() / stride) as u32;
        if band_rows == 0 {
            return;
        }
        let y_start = self.rect.y1.max(band_y0);
        let y_end = self.rect.y2.min(band_y0 + band_rows - 1);

        for y in y_start..=y_end {
            for x in self.rect.x1..=self.rect.x2 {
                let pt = self.sample_position(x, y);
                if !frame_size.contains(&pt) {
                    continue;
                }
                let source = frame.get_pixel(pt.x as u32, pt.y as u32);
                let offset = (y - band_y0) as usize * stride + x as usize * 3;
                blend_pixel(
                    &mut band[offset..offset + 3],
                    &source.0,
                    weights.get(x, y),
                    self.blending_threshold,
                );
            }
        }
    }
}

fn interpolation_factor(p: u32, start: u32, end: u32) -> f64 {
    if end == start {
        0.0
    } else {
        (p - start) as f64 / (end - start) as f64
    }
}

/// Composite one source pixel according to its normalized weight.
///
/// Above the band the source overwrites the canvas, inside it a linear share
/// of the source is added, below it the canvas is left alone.
pub(crate) fn blend_pixel(target: &mut [u8], source: &[u8; 3], weight: f64, threshold: f64) {
    if weight > 0.5 + threshold {
        target.copy_from_slice(source);
    } else if weight > 0.5 - threshold {
        let factor = (weight - 0.5 + threshold) / (2.0 * threshold);
        for (channel, value) in target.iter_mut().zip(source) {
            let share = (factor * *value as f64).round() as u8;
            *channel = channel.saturating_add(share);
        }
    }
}

//! All meshes of one camera, plus that camera's weight map.
//!
//! A [`FrameMapper`] is created in the raw state, where it can only report
//! its weights. [`FrameMapper::normalize_weight`] consumes it and returns the
//! normalized mapper, the only state that can paint.

use crate::camera::{CameraModel, Resolution};
use crate::stitch::mesh::Mesh;
use crate::stitch::weights::{NormalizedWeightMap, RawWeightMap, TotalWeightMap};
use crate::stitch::StitchError;
use image::RgbImage;
use log::debug;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct FrameMapper<C, W> {
    camera: C,
    canvas: Resolution,
    tile_size: u32,
    /// Valid meshes grouped by tile row.
    bands: Vec<Vec<Mesh>>,
    weights: W,
}

impl<C: CameraModel> FrameMapper<C, RawWeightMap> {
    /// Cover the canvas with `tile_size` meshes and keep those the camera sees.
    pub fn new(
        camera: C,
        canvas: Resolution,
        tile_size: u32,
        blending_threshold: f64,
    ) -> Result<Self, StitchError> {
        if canvas.is_empty() {
            return Err(StitchError::InvalidCanvas {
                width: canvas.width,
                height: canvas.height,
            });
        }
        if tile_size == 0 {
            return Err(StitchError::InvalidTileSize(tile_size));
        }
        if !(0.0..=0.5).contains(&blending_threshold) {
            return Err(StitchError::InvalidBlendingThreshold(blending_threshold));
        }

        let rows = canvas.height.div_ceil(tile_size);
        let cols = canvas.width.div_ceil(tile_size);
        let mut weights = RawWeightMap::zeros(canvas);
        let mut bands = vec![Vec::new(); rows as usize];

        for col in 0..cols {
            for row in 0..rows {
                let mesh = Mesh::new(
                    row,
                    col,
                    tile_size,
                    &canvas,
                    &camera,
                    blending_threshold,
                    &mut weights,
                )?;
                if mesh.check_validity(&camera) {
                    bands[row as usize].push(mesh);
                }
            }
        }

        let mapper = Self {
            camera,
            canvas,
            tile_size,
            bands,
            weights,
        };
        debug!(
            "Camera '{}': {} of {} tiles visible",
            mapper.camera.name(),
            mapper.mesh_count(),
            rows * cols
        );
        Ok(mapper)
    }

    /// Divide the raw weights by the total of every camera in the rig.
    pub fn normalize_weight(
        self,
        total: &TotalWeightMap,
    ) -> Result<FrameMapper<C, NormalizedWeightMap>, StitchError> {
        Ok(FrameMapper {
            weights: self.weights.normalize(total)?,
            camera: self.camera,
            canvas: self.canvas,
            tile_size: self.tile_size,
            bands: self.bands,
        })
    }
}

impl<C: CameraModel> FrameMapper<C, NormalizedWeightMap> {
    /// Paint `frame` onto `canvas` through every mesh of this camera.
    ///
    /// Tile rows are painted in parallel; each one owns a disjoint band of
    /// canvas rows.
    pub fn paint_on_canvas(&self, frame: &RgbImage, canvas: &mut RgbImage) -> Result<(), StitchError> {
        let actual = Resolution::new(canvas.width(), canvas.height());
        if actual != self.canvas {
            return Err(StitchError::CanvasSizeMismatch {
                expected: self.canvas,
                actual,
            });
        }

        let width = self.canvas.width;
        let band_len = width as usize * 3 * self.tile_size as usize;
        let tile_size = self.tile_size;
        let weights = &self.weights;
        let buffer: &mut [u8] = &mut *canvas;

        buffer
            .par_chunks_mut(band_len)
            .zip(self.bands.par_iter())
            .enumerate()
            .for_each(|(index, (band, meshes))| {
                let band_y0 = index as u32 * tile_size;
                for mesh in meshes {
                    mesh.paint_band(band, band_y0, width, frame, weights);
                }
            });
        Ok(())
    }
}

impl<C: CameraModel, W> FrameMapper<C, W> {
    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn weights(&self) -> &W {
        &self.weights
    }

    pub fn canvas(&self) -> Resolution {
        self.canvas
    }

    pub fn mesh_count(&self) -> usize {
        self.bands.iter().map(Vec::len).sum()
    }

    pub fn meshes(&self) -> impl Iterator<Item = &Mesh> {
        self.bands.iter().flatten()
    }
}

//! Mesh-based warping and blending of camera frames onto the panorama canvas.
//!
//! [`PanoramaStitcher`] owns one normalized [`FrameMapper`] per camera of a
//! [`CameraRig`]. Building it runs both weight phases: every camera's raw
//! weights are accumulated, summed into a [`TotalWeightMap`], and then each
//! camera is normalized against that total.

use crate::camera::{CameraModel, CameraModelError, CameraRig, OcamModel, Resolution};
use image::RgbImage;
use log::info;
use std::collections::BTreeMap;

pub mod frame_mapper;
pub mod mesh;
pub mod weights;

pub use frame_mapper::FrameMapper;
pub use mesh::{Mesh, TileRect, DEFAULT_BLENDING_THRESHOLD};
pub use weights::{NormalizedWeightMap, RawWeightMap, TotalWeightMap};

#[derive(thiserror::Error, Debug)]
pub enum StitchError {
    #[error("Canvas must be non-empty, got {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },
    #[error("Tile size must be positive, got {0}")]
    InvalidTileSize(u32),
    #[error("Tile ({row}, {col}) of size {tile_size} lies outside the canvas")]
    InvalidTile { row: u32, col: u32, tile_size: u32 },
    #[error("Blending threshold must lie in [0, 0.5], got {0}")]
    InvalidBlendingThreshold(f64),
    #[error("No frame mapper for camera: {0}")]
    UnknownCamera(String),
    #[error("Frame of camera '{camera}' is {actual:?}, calibration expects {expected:?}")]
    FrameSizeMismatch {
        camera: String,
        expected: Resolution,
        actual: Resolution,
    },
    #[error("Canvas is {actual:?}, expected {expected:?}")]
    CanvasSizeMismatch {
        expected: Resolution,
        actual: Resolution,
    },
    #[error("Weight map is {actual:?}, expected {expected:?}")]
    WeightMapSizeMismatch {
        expected: Resolution,
        actual: Resolution,
    },
    #[error(transparent)]
    Camera(#[from] CameraModelError),
}

/// Immutable camera name to normalized [`FrameMapper`] mapping.
#[derive(Debug, Clone)]
pub struct PanoramaStitcher {
    canvas: Resolution,
    mappers: BTreeMap<String, FrameMapper<OcamModel, NormalizedWeightMap>>,
}

impl PanoramaStitcher {
    pub fn new(
        rig: &CameraRig,
        canvas: Resolution,
        tile_size: u32,
        blending_threshold: f64,
    ) -> Result<Self, StitchError> {
        info!(
            "Building frame mappers for {} cameras on a {}x{} canvas (tile size {})",
            rig.len(),
            canvas.width,
            canvas.height,
            tile_size
        );
        let raw = rig
            .iter()
            .map(|(name, camera)| {
                FrameMapper::new(camera.clone(), canvas, tile_size, blending_threshold)
                    .map(|mapper| (name.to_string(), mapper))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total = TotalWeightMap::sum(canvas, raw.iter().map(|(_, mapper)| mapper.weights()))?;

        let mappers = raw
            .into_iter()
            .map(|(name, mapper)| mapper.normalize_weight(&total).map(|mapper| (name, mapper)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Self { canvas, mappers })
    }

    pub fn canvas(&self) -> Resolution {
        self.canvas
    }

    pub fn mapper(&self, camera: &str) -> Result<&FrameMapper<OcamModel, NormalizedWeightMap>, StitchError> {
        self.mappers
            .get(camera)
            .ok_or_else(|| StitchError::UnknownCamera(camera.to_string()))
    }

    /// Check that frames of `camera` have the calibrated size.
    pub fn check_frame_size(&self, camera: &str, actual: Resolution) -> Result<(), StitchError> {
        let expected = self.mapper(camera)?.camera().get_resolution();
        if actual != expected {
            return Err(StitchError::FrameSizeMismatch {
                camera: camera.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Paint one camera frame onto `canvas`.
    pub fn paint(&self, camera: &str, frame: &RgbImage, canvas: &mut RgbImage) -> Result<(), StitchError> {
        self.check_frame_size(camera, Resolution::new(frame.width(), frame.height()))?;
        self.mapper(camera)?.paint_on_canvas(frame, canvas)
    }

    /// Compose the available frames, in the given order, onto a black canvas.
    pub fn compose<'a>(
        &self,
        frames: impl IntoIterator<Item = (&'a str, Option<&'a RgbImage>)>,
    ) -> Result<RgbImage, StitchError> {
        let mut canvas = RgbImage::new(self.canvas.width, self.canvas.height);
        for (camera, frame) in frames {
            match frame {
                Some(frame) => self.paint(camera, frame, &mut canvas)?,
                None => {
                    self.mapper(camera)?;
                }
            }
        }
        Ok(canvas)
    }
}

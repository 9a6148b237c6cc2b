//! Per-camera blend weight maps.
//!
//! Weights go through two phases. Each camera first accumulates a
//! [`RawWeightMap`] while its meshes are built. Once every camera is built,
//! the raw maps are reduced into a [`TotalWeightMap`], and each raw map is
//! consumed to produce a [`NormalizedWeightMap`] holding that camera's blend
//! share. Only normalized maps can be used for painting.

use crate::camera::Resolution;
use crate::stitch::StitchError;
use nalgebra::DMatrix;

/// Unnormalized `1/rho` weights of one camera, indexed `(row, column)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWeightMap {
    weights: DMatrix<f64>,
}

impl RawWeightMap {
    pub(crate) fn zeros(canvas: Resolution) -> Self {
        Self {
            weights: DMatrix::zeros(canvas.height as usize, canvas.width as usize),
        }
    }

    pub(crate) fn set(&mut self, x: u32, y: u32, weight: f64) {
        self.weights[(y as usize, x as usize)] = weight;
    }

    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.weights[(y as usize, x as usize)]
    }

    pub fn canvas(&self) -> Resolution {
        canvas_of(&self.weights)
    }

    /// Divide by the total of all cameras. Pixels with zero total get 0.
    pub fn normalize(self, total: &TotalWeightMap) -> Result<NormalizedWeightMap, StitchError> {
        if self.canvas() != total.canvas() {
            return Err(StitchError::WeightMapSizeMismatch {
                expected: total.canvas(),
                actual: self.canvas(),
            });
        }
        let weights = self.weights.zip_map(&total.weights, |weight, sum| {
            if sum > 0.0 {
                weight / sum
            } else {
                0.0
            }
        });
        Ok(NormalizedWeightMap { weights })
    }
}

/// Sum of the raw weights of every camera in a rig.
#[derive(Debug, Clone, PartialEq)]
pub struct TotalWeightMap {
    weights: DMatrix<f64>,
}

impl TotalWeightMap {
    /// Reduce all raw maps at once. Every map must cover `canvas`.
    pub fn sum<'a>(
        canvas: Resolution,
        maps: impl IntoIterator<Item = &'a RawWeightMap>,
    ) -> Result<Self, StitchError> {
        let mut weights = DMatrix::zeros(canvas.height as usize, canvas.width as usize);
        for map in maps {
            if map.canvas() != canvas {
                return Err(StitchError::WeightMapSizeMismatch {
                    expected: canvas,
                    actual: map.canvas(),
                });
            }
            weights += &map.weights;
        }
        Ok(Self { weights })
    }

    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.weights[(y as usize, x as usize)]
    }

    pub fn canvas(&self) -> Resolution {
        canvas_of(&self.weights)
    }
}

/// Blend share of one camera in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWeightMap {
    weights: DMatrix<f64>,
}

impl NormalizedWeightMap {
    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.weights[(y as usize, x as usize)]
    }

    pub fn canvas(&self) -> Resolution {
        canvas_of(&self.weights)
    }
}

fn canvas_of(weights: &DMatrix<f64>) -> Resolution {
    Resolution::new(weights.ncols() as u32, weights.nrows() as u32)
}

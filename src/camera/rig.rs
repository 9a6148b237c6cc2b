//! Name-keyed collection of calibrated cameras, loaded from a calibration file.
//!
//! The calibration file lists every camera under a `Cameras` sequence:
//!
//! ```yaml
//! Cameras:
//!   - Name: cam0
//!     Width: 1920
//!     Height: 1080
//!     U0: 960.0
//!     V0: 540.0
//!     C: 1.0
//!     D: 0.0
//!     E: 0.0
//!     Poly: [-500.0, 0.0, 0.0004]
//!     InversePoly: [800.0, 500.0]
//!     Extrinsic: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
//! ```

use crate::camera::{CameraModelError, OcamModel, OcamParams, Resolution};
use crate::util::{self, yaml, UtilError};
use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use yaml_rust::Yaml;

impl From<UtilError> for CameraModelError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::IOError(e) => CameraModelError::IOError(e.to_string()),
            UtilError::MissingPath(path) => {
                CameraModelError::IOError(format!("file not found: {}", path.display()))
            }
            UtilError::YamlError(msg) => CameraModelError::YamlError(msg),
            other => CameraModelError::InvalidParams(other.to_string()),
        }
    }
}

/// Immutable mapping from camera name to its calibrated model.
///
/// Iteration order is the lexical order of the camera names.
#[derive(Debug, Clone, Default)]
pub struct CameraRig {
    cameras: BTreeMap<String, OcamModel>,
}

impl CameraRig {
    /// Builds a rig from already constructed models.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::DuplicateCamera`] if two models share a name.
    pub fn from_models(models: impl IntoIterator<Item = OcamModel>) -> Result<Self, CameraModelError> {
        let mut cameras = BTreeMap::new();
        for model in models {
            let name = model.params().name.clone();
            if cameras.insert(name.clone(), model).is_some() {
                return Err(CameraModelError::DuplicateCamera(name));
            }
        }
        Ok(Self { cameras })
    }

    /// Loads every camera from a calibration YAML file.
    pub fn load_from_yaml(path: &Path) -> Result<Self, CameraModelError> {
        let doc = util::load_yaml_document(path)?;
        let rig = Self::from_yaml(&doc)?;
        info!(
            "Loaded {} cameras from {}: {:?}",
            rig.len(),
            path.display(),
            rig.names().collect::<Vec<_>>()
        );
        Ok(rig)
    }

    pub fn from_yaml(doc: &Yaml) -> Result<Self, CameraModelError> {
        let nodes = yaml::get_seq(doc, "Cameras")?;
        if nodes.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "calibration contains no cameras".to_string(),
            ));
        }
        let models = nodes
            .iter()
            .map(|node| parse_camera(node).and_then(OcamModel::new))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_models(models)
    }

    pub fn get(&self, name: &str) -> Result<&OcamModel, CameraModelError> {
        self.cameras
            .get(name)
            .ok_or_else(|| CameraModelError::UnknownCamera(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cameras.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OcamModel)> {
        self.cameras.iter().map(|(name, model)| (name.as_str(), model))
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

fn parse_camera(node: &Yaml) -> Result<OcamParams, CameraModelError> {
    let name = yaml::get_str(node, "Name")?;
    let with_name = |e: UtilError| {
        CameraModelError::InvalidParams(format!("camera '{name}': {e}"))
    };

    Ok(OcamParams {
        resolution: Resolution::new(
            yaml::get_u32(node, "Width").map_err(with_name)?,
            yaml::get_u32(node, "Height").map_err(with_name)?,
        ),
        u0: yaml::get_f64(node, "U0").map_err(with_name)?,
        v0: yaml::get_f64(node, "V0").map_err(with_name)?,
        affine: [
            yaml::get_f64(node, "C").map_err(with_name)?,
            yaml::get_f64(node, "D").map_err(with_name)?,
            yaml::get_f64(node, "E").map_err(with_name)?,
        ],
        poly: yaml::get_f64_vec(node, "Poly").map_err(with_name)?,
        inverse_poly: yaml::get_f64_vec(node, "InversePoly").map_err(with_name)?,
        extrinsic: yaml::get_f64_vec(node, "Extrinsic").map_err(with_name)?,
        name,
    })
}

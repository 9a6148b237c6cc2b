//! Fisheye Panorama Library
//!
//! Stitches videos recorded by a rig of independently started fisheye
//! cameras into equirectangular panorama videos. The library provides:
//! - The omnidirectional (OCam) camera model and a calibrated camera rig
//! - Mapping between the panorama canvas and the unit viewing sphere
//! - Mesh-based warping with weighted blending of overlapping cameras
//! - Audio cross-correlation to recover the start offset of every clip
//! - A shared timeline that reads, stitches and samples synchronized frames
//!
//! Video decoding and encoding go through the traits in [`media`]; the
//! default implementation drives the `ffmpeg` and `ffprobe` binaries.

pub mod camera;
pub mod config;
pub mod geometry;
pub mod media;
pub mod pipeline;
pub mod stitch;
pub mod synch;
pub mod timeline;
pub mod util;

// Re-export commonly used types
pub use camera::{CameraModel, CameraModelError, CameraRig, OcamModel, OcamParams, Resolution};
pub use config::PanoConfig;
pub use pipeline::{run_synchronization, PanoVideoMapper, PipelineError, VideoList};
pub use stitch::{FrameMapper, PanoramaStitcher, StitchError};
pub use synch::{SynchError, SynchParameters};
pub use timeline::{CombinedVideoClip, TimelineError};

//! Media collaborators: clip decoding, panorama encoding and face overlays.
//!
//! The stitching and synchronization code only sees the traits defined here.
//! [`ffmpeg`] implements them on top of the `ffmpeg` and `ffprobe` binaries.

use crate::camera::Resolution;
use crate::util;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

pub mod ffmpeg;
#[cfg(test)]
pub(crate) mod testing;

pub use ffmpeg::{FfmpegBackend, FfmpegClip, FfmpegEncoder};

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("{0} is required but was not found on PATH")]
    ToolNotFound(String),
    #[error("Failed to probe {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
    #[error("No video stream in {0}")]
    NoVideoStream(PathBuf),
    #[error("No audio track in {0}")]
    NoAudioTrack(PathBuf),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Frame is {actual:?}, expected {expected:?}")]
    FrameSizeMismatch {
        expected: Resolution,
        actual: Resolution,
    },
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Random access to the video frames of one clip.
pub trait FrameSource {
    fn frame_size(&self) -> Resolution;

    /// Frame shown at `local_time` seconds into the clip, `None` past the end.
    fn read_frame_at(&self, local_time: f64) -> Result<Option<RgbImage>, MediaError>;
}

/// Audio track of one clip.
pub trait AudioSource {
    /// Mono samples of the first `duration` seconds, resampled to `sample_rate`.
    ///
    /// Shorter clips return all of their audio.
    fn extract_audio(&self, duration: f64, sample_rate: u32) -> Result<Vec<f32>, MediaError>;
}

/// A recorded clip with both video and audio.
pub trait ClipSource: FrameSource + AudioSource + Send + Sync {}

impl<T: FrameSource + AudioSource + Send + Sync> ClipSource for T {}

/// Consumer of composed panorama frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError>;

    /// Flush everything written so far. No frame may follow.
    fn finish(&mut self) -> Result<(), MediaError>;
}

/// Opens clips and creates video writers.
pub trait MediaBackend: Send + Sync {
    fn open_clip(&self, path: &Path) -> Result<Box<dyn ClipSource>, MediaError>;

    fn create_sink(
        &self,
        path: &Path,
        size: Resolution,
        fps: u32,
    ) -> Result<Box<dyn FrameSink>, MediaError>;
}

/// Axis-aligned face bounding box on a panorama frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Vec<FaceBox>;
}

const FACE_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const FACE_BOX_THICKNESS: u32 = 3;

/// Run `detector` on `image` and outline every face it finds.
pub fn draw_faces(image: &mut RgbImage, detector: &dyn FaceDetector) -> usize {
    let faces = detector.detect(image);
    for face in &faces {
        util::draw_rectangle(
            image,
            face.x,
            face.y,
            face.width,
            face.height,
            FACE_BOX_THICKNESS,
            FACE_BOX_COLOR,
        );
    }
    faces.len()
}

//! In-memory clips and sinks for tests that must not depend on `ffmpeg`.

use crate::camera::Resolution;
use crate::media::{AudioSource, ClipSource, FrameSink, FrameSource, MediaBackend, MediaError};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A clip of `frame_count` uniform frames at `fps`.
///
/// Frame `n` is filled with `[color[0], color[1], n]` so tests can tell
/// which frame was read.
#[derive(Debug, Clone)]
pub(crate) struct MockClip {
    pub size: Resolution,
    pub fps: f64,
    pub frame_count: usize,
    pub color: [u8; 2],
    pub audio: Vec<f32>,
}

impl MockClip {
    pub fn new(frame_count: usize, fps: f64, color: [u8; 2]) -> Self {
        Self {
            size: Resolution::new(100, 100),
            fps,
            frame_count,
            color,
            audio: Vec::new(),
        }
    }

    pub fn with_audio(mut self, audio: Vec<f32>) -> Self {
        self.audio = audio;
        self
    }
}

impl FrameSource for MockClip {
    fn frame_size(&self) -> Resolution {
        self.size
    }

    fn read_frame_at(&self, local_time: f64) -> Result<Option<RgbImage>, MediaError> {
        if local_time < 0.0 {
            return Ok(None);
        }
        let index = (local_time * self.fps + 1e-6).floor() as usize;
        if index >= self.frame_count {
            return Ok(None);
        }
        Ok(Some(RgbImage::from_pixel(
            self.size.width,
            self.size.height,
            Rgb([self.color[0], self.color[1], index as u8]),
        )))
    }
}

impl AudioSource for MockClip {
    fn extract_audio(&self, duration: f64, sample_rate: u32) -> Result<Vec<f32>, MediaError> {
        let count = (duration * sample_rate as f64).round() as usize;
        Ok(self.audio.iter().copied().take(count).collect())
    }
}

/// Deterministic white noise in `[-1, 1)`.
pub(crate) fn noise(len: usize, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
        })
        .collect()
}

/// Sink keeping every frame it receives.
#[derive(Debug, Default, Clone)]
pub(crate) struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MediaError> {
        self.finished = true;
        Ok(())
    }
}

struct SharedSink {
    path: PathBuf,
    written: Arc<Mutex<Vec<(PathBuf, usize)>>>,
    count: usize,
}

impl FrameSink for SharedSink {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<(), MediaError> {
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MediaError> {
        self.written
            .lock()
            .map_err(|_| MediaError::Encode("poisoned".to_string()))?
            .push((self.path.clone(), self.count));
        Ok(())
    }
}

/// Backend serving [`MockClip`]s by file name.
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    pub clips: HashMap<String, MockClip>,
    /// `(path, frame count)` of every finished video.
    pub written: Arc<Mutex<Vec<(PathBuf, usize)>>>,
}

impl MockBackend {
    pub fn with_clip(mut self, file_name: &str, clip: MockClip) -> Self {
        self.clips.insert(file_name.to_string(), clip);
        self
    }

    pub fn written(&self) -> Vec<(PathBuf, usize)> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl MediaBackend for MockBackend {
    fn open_clip(&self, path: &Path) -> Result<Box<dyn ClipSource>, MediaError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.clips
            .get(&name)
            .cloned()
            .map(|clip| Box::new(clip) as Box<dyn ClipSource>)
            .ok_or_else(|| MediaError::Decode(format!("no mock clip for {name}")))
    }

    fn create_sink(
        &self,
        path: &Path,
        _size: Resolution,
        _fps: u32,
    ) -> Result<Box<dyn FrameSink>, MediaError> {
        Ok(Box::new(SharedSink {
            path: path.to_path_buf(),
            written: Arc::clone(&self.written),
            count: 0,
        }))
    }
}

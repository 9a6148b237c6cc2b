//! Global timeline over a set of synchronized clips.
//!
//! Every clip carries a shift in seconds. Global time `t` maps to local time
//! `t - shift` in that clip; negative local times mean the clip has not
//! started yet.

use crate::media::{draw_faces, ClipSource, FaceDetector, FrameSink, MediaBackend, MediaError};
use crate::stitch::{PanoramaStitcher, StitchError};
use crate::synch::{self, SynchError, SynchParameters};
use crate::util::{self, UtilError};
use image::RgbImage;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum TimelineError {
    #[error("No videos are associated with the session")]
    NoClips,
    #[error("Video file not found: {0}")]
    MissingFile(PathBuf),
    #[error("Videos have not been synchronized")]
    NotSynchronized,
    #[error("Frame rate must be positive, got {0}")]
    InvalidFps(u32),
    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f64),
    #[error(transparent)]
    Synch(#[from] SynchError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Stitch(#[from] StitchError),
    #[error(transparent)]
    Util(#[from] UtilError),
}

/// One recorded clip and its place on the global timeline.
pub struct VideoClip {
    file: PathBuf,
    camera_name: String,
    shift: f64,
    source: Box<dyn ClipSource>,
}

impl VideoClip {
    pub fn new(file: PathBuf, camera_name: String, shift: f64, source: Box<dyn ClipSource>) -> Self {
        Self {
            file,
            camera_name,
            shift,
            source,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    /// Seconds between the global origin and this clip's first frame.
    pub fn shift(&self) -> f64 {
        self.shift
    }

    pub fn source(&self) -> &dyn ClipSource {
        self.source.as_ref()
    }

    /// Frame at `global_time`, or `None` before the clip starts or after it ends.
    pub fn read_synched_frame(&self, global_time: f64) -> Result<Option<RgbImage>, MediaError> {
        let local_time = global_time - self.shift;
        if local_time < 0.0 {
            return Ok(None);
        }
        self.source.read_frame_at(local_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchState {
    Unsynchronized,
    Synchronized,
}

/// Contents of `SynchedVideos.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SynchronizedVideos {
    pub videos: Vec<SynchronizedVideo>,
    pub max_shift: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SynchronizedVideo {
    pub camera_name: String,
    pub file: String,
    pub offset: f64,
}

/// The clips of one recording session, played back on a shared timeline.
pub struct CombinedVideoClip {
    clips: Vec<VideoClip>,
    max_shift: f64,
    state: SynchState,
}

impl CombinedVideoClip {
    /// Open every clip listed in `parameters`.
    ///
    /// The listed offsets become the initial shifts. With `synchronized` set
    /// they are taken as final and no audio alignment is needed.
    pub fn load(
        parameters: &SynchParameters,
        synchronized: bool,
        backend: &dyn MediaBackend,
    ) -> Result<Self, TimelineError> {
        if parameters.entries.is_empty() {
            return Err(TimelineError::NoClips);
        }
        let mut clips = Vec::with_capacity(parameters.entries.len());
        for entry in &parameters.entries {
            if !entry.file.is_file() {
                return Err(TimelineError::MissingFile(entry.file.clone()));
            }
            let source = backend.open_clip(&entry.file)?;
            clips.push(VideoClip::new(
                entry.file.clone(),
                entry.camera_name.clone(),
                entry.offset,
                source,
            ));
        }
        Self::from_clips(clips, parameters.max_shift, synchronized)
    }

    pub fn from_clips(
        clips: Vec<VideoClip>,
        max_shift: f64,
        synchronized: bool,
    ) -> Result<Self, TimelineError> {
        if clips.is_empty() {
            return Err(TimelineError::NoClips);
        }
        let state = if synchronized {
            SynchState::Synchronized
        } else {
            SynchState::Unsynchronized
        };
        Ok(Self {
            clips,
            max_shift,
            state,
        })
    }

    pub fn clips(&self) -> &[VideoClip] {
        &self.clips
    }

    pub fn camera_names(&self) -> impl Iterator<Item = &str> {
        self.clips.iter().map(VideoClip::camera_name)
    }

    pub fn state(&self) -> SynchState {
        self.state
    }

    pub fn max_shift(&self) -> f64 {
        self.max_shift
    }

    /// Align all clips on their audio tracks, the first clip being the reference.
    pub fn synchronize_with_audio(&mut self, sample_rate: u32) -> Result<(), TimelineError> {
        if self.clips.len() < 2 {
            return Err(SynchError::NotEnoughClips(self.clips.len()).into());
        }
        let duration = self.max_shift * 2.0;
        info!(
            "Synchronizing {} videos on {duration}s of audio at {sample_rate} Hz",
            self.clips.len()
        );

        let windows = self
            .clips
            .par_iter()
            .map(|clip| {
                synch::extract_audio_window(
                    clip.source(),
                    &clip.file.display().to_string(),
                    duration,
                    sample_rate,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let shifts = synch::synchronize_all(&windows)?;

        for (clip, shift) in self.clips.iter_mut().zip(shifts) {
            clip.shift = shift;
            info!("\t{shift} seconds: {}", clip.file.display());
        }
        self.state = SynchState::Synchronized;
        Ok(())
    }

    /// One frame slot per clip at `global_time`, in clip order.
    pub fn read_frames_at(&self, global_time: f64) -> Result<Vec<Option<RgbImage>>, TimelineError> {
        if self.state != SynchState::Synchronized {
            return Err(TimelineError::NotSynchronized);
        }
        self.clips
            .iter()
            .map(|clip| clip.read_synched_frame(global_time).map_err(TimelineError::from))
            .collect()
    }

    /// Stitch every time step into `sink` until no clip has frames left.
    ///
    /// Returns the number of panorama frames written.
    pub fn generate_panorama(
        &self,
        stitcher: &PanoramaStitcher,
        fps: u32,
        sink: &mut dyn FrameSink,
        face_detector: Option<&dyn FaceDetector>,
    ) -> Result<usize, TimelineError> {
        if fps == 0 {
            return Err(TimelineError::InvalidFps(fps));
        }
        let mut step = 0usize;
        loop {
            let time = step as f64 / fps as f64;
            let frames = self.read_frames_at(time)?;
            if frames.iter().all(Option::is_none) {
                break;
            }
            let mut panorama = stitcher.compose(
                self.camera_names()
                    .zip(frames.iter())
                    .map(|(camera, frame)| (camera, frame.as_ref())),
            )?;
            if let Some(detector) = face_detector {
                let faces = draw_faces(&mut panorama, detector);
                debug!("{faces} faces at {time:.3}s");
            }
            sink.write_frame(&panorama)?;
            step += 1;
            if step % 100 == 0 {
                info!("Stitched {step} frames ({time:.1}s)");
            }
        }
        sink.finish()?;
        info!("Stitched {step} panorama frames");
        Ok(step)
    }

    /// Walk the timeline from `start_time` every `1 / sample_rate` seconds and
    /// hand the frames of every camera to `visitor` on steps where all cameras
    /// have one.
    ///
    /// Returns the number of visited steps.
    pub fn collect_samples<E, F>(&self, start_time: f64, sample_rate: f64, mut visitor: F) -> Result<usize, E>
    where
        E: From<TimelineError>,
        F: FnMut(&[(&str, RgbImage)]) -> Result<(), E>,
    {
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(TimelineError::InvalidSampleRate(sample_rate).into());
        }
        let mut visited = 0;
        let mut step = 0usize;
        loop {
            let time = start_time + step as f64 / sample_rate;
            step += 1;
            let frames = self.read_frames_at(time)?;
            if frames.iter().all(Option::is_none) {
                break;
            }
            let complete: Option<Vec<_>> = self
                .camera_names()
                .zip(frames)
                .map(|(camera, frame)| frame.map(|frame| (camera, frame)))
                .collect();
            match complete {
                Some(samples) => {
                    visitor(&samples)?;
                    visited += 1;
                }
                None => debug!("Skipping {time:.3}s: not every camera has a frame"),
            }
        }
        Ok(visited)
    }

    pub fn synchronization_result(&self) -> SynchronizedVideos {
        SynchronizedVideos {
            videos: self
                .clips
                .iter()
                .map(|clip| SynchronizedVideo {
                    camera_name: clip.camera_name.clone(),
                    file: clip.file.to_string_lossy().into_owned(),
                    offset: clip.shift,
                })
                .collect(),
            max_shift: self.max_shift,
        }
    }

    /// Write the resolved shifts as `SynchedVideos.yaml`-style YAML.
    pub fn save_synchronization_result(&self, path: &Path) -> Result<(), TimelineError> {
        util::save_yaml(&self.synchronization_result(), path)?;
        info!("Saved synchronization result to {}", path.display());
        Ok(())
    }
}

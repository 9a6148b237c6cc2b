//! Session driver: turns folders of per-camera recordings into synchronized
//! panorama videos or per-camera sample images.
//!
//! A folder list names one folder per camera. Every video file name found in
//! any of them is a recording session, e.g. `cam0/3.MP4` and `cam1/3.MP4`
//! form session `3.MP4`, written to `<output>/3/`.

use crate::camera::{CameraModelError, CameraRig};
use crate::config::PanoConfig;
use crate::media::{FaceDetector, FrameSource, MediaBackend, MediaError};
use crate::stitch::{PanoramaStitcher, StitchError};
use crate::synch::{SynchEntry, SynchError, SynchParameters};
use crate::timeline::{CombinedVideoClip, SynchronizedVideos, TimelineError};
use crate::util::{self, yaml, UtilError};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use yaml_rust::Yaml;

pub const SYNCH_RESULT_FILE: &str = "SynchedVideos.yaml";
pub const PANO_VIDEO_FILE: &str = "pano_video.mp4";
pub const SYNCH_REPORT_FILE: &str = "synch_report.csv";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Camera(#[from] CameraModelError),
    #[error(transparent)]
    Stitch(#[from] StitchError),
    #[error(transparent)]
    Synch(#[from] SynchError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Util(#[from] UtilError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraFolder {
    pub camera_name: String,
    pub folder: PathBuf,
}

/// Folder-per-camera video list.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoList {
    pub cameras: Vec<CameraFolder>,
    /// Video file names, sorted.
    pub sessions: Vec<String>,
    pub max_shift: Option<f64>,
    pub sample_start_index: u32,
}

impl VideoList {
    /// Read `Videos: [{CameraName, Folder}]` with optional `MaxShift` and
    /// `SampleStartIndex`, and enumerate the sessions.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let doc = util::load_yaml_document(path)?;
        let list = Self::from_yaml(&doc)?;
        info!("Input video list file: {}", path.display());
        info!("Videos to continue: {}", list.sessions.join(", "));
        Ok(list)
    }

    pub fn from_yaml(doc: &Yaml) -> Result<Self, PipelineError> {
        let mut cameras: Vec<CameraFolder> = Vec::new();
        // session -> indices of the cameras that recorded it
        let mut recorded: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for node in yaml::get_seq(doc, "Videos")? {
            let camera_name = yaml::get_str(node, "CameraName")?;
            let folder = PathBuf::from(yaml::get_str(node, "Folder")?);
            if !folder.is_dir() {
                return Err(PipelineError::Configuration(format!(
                    "Video folder of {camera_name} does not exist: {}",
                    folder.display()
                )));
            }
            for name in util::list_files(&folder)? {
                if util::is_video_file(&name) {
                    recorded.entry(name).or_default().push(cameras.len());
                }
            }
            cameras.push(CameraFolder {
                camera_name,
                folder,
            });
        }
        if cameras.is_empty() {
            return Err(PipelineError::Configuration(
                "Video list names no cameras".to_string(),
            ));
        }

        for (session, present) in &recorded {
            for (index, camera) in cameras.iter().enumerate() {
                if !present.contains(&index) {
                    warn!("{} doesn't have video {session}", camera.camera_name);
                }
            }
        }

        let max_shift = yaml::get_optional_f64(doc, "MaxShift")?;
        let sample_start_index = match yaml::get_optional_i64(doc, "SampleStartIndex")? {
            Some(index) => u32::try_from(index).map_err(|_| {
                PipelineError::Configuration(format!(
                    "SampleStartIndex must be non-negative, got {index}"
                ))
            })?,
            None => 0,
        };

        Ok(Self {
            cameras,
            sessions: recorded.into_keys().collect(),
            max_shift,
            sample_start_index,
        })
    }

    /// Explicit list for one session, all offsets starting at 0.
    pub fn session_parameters(&self, session: &str, default_max_shift: f64) -> SynchParameters {
        SynchParameters::new(
            self.cameras
                .iter()
                .map(|camera| SynchEntry {
                    file: camera.folder.join(session),
                    camera_name: camera.camera_name.clone(),
                    offset: 0.0,
                })
                .collect(),
            self.max_shift.unwrap_or(default_max_shift),
        )
    }
}

/// Output sub-folder of a session: its file name without the extension.
fn session_folder_name(session: &str) -> String {
    Path::new(session)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| session.to_string())
}

/// Runs the panorama and sampling workflows over every session of a [`VideoList`].
pub struct PanoVideoMapper<B> {
    output_folder: PathBuf,
    list: VideoList,
    config: PanoConfig,
    backend: B,
}

impl<B: MediaBackend> PanoVideoMapper<B> {
    /// Create and empty `output_folder`. Both workflows then write into it
    /// without clearing, so panoramas and samples can share one run.
    pub fn new(
        output_folder: impl Into<PathBuf>,
        list: VideoList,
        config: PanoConfig,
        backend: B,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let output_folder = output_folder.into();
        util::ensure_dir(&output_folder)?;
        util::clear_folder(&output_folder)?;
        info!("Output result folder: {}", output_folder.display());
        Ok(Self {
            output_folder,
            list,
            config,
            backend,
        })
    }

    pub fn list(&self) -> &VideoList {
        &self.list
    }

    pub fn config(&self) -> &PanoConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create the session folder, align its clips and save the offsets.
    fn prepare_session(&self, session: &str) -> Result<(PathBuf, CombinedVideoClip), PipelineError> {
        let session_folder = self.output_folder.join(session_folder_name(session));
        util::ensure_dir(&session_folder)?;

        let parameters = self
            .list
            .session_parameters(session, self.config.default_max_shift);
        let mut timeline = CombinedVideoClip::load(&parameters, false, &self.backend)?;
        timeline.synchronize_with_audio(self.config.audio_sample_rate)?;
        timeline.save_synchronization_result(&session_folder.join(SYNCH_RESULT_FILE))?;
        Ok((session_folder, timeline))
    }

    /// Stitch every session into `<output>/<session>/pano_video.mp4`.
    ///
    /// Returns the paths of the written videos.
    pub fn generate_pano(
        &self,
        rig: &CameraRig,
        face_detector: Option<&dyn FaceDetector>,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        for camera in &self.list.cameras {
            rig.get(&camera.camera_name)?;
        }

        let stitcher = PanoramaStitcher::new(
            rig,
            self.config.canvas(),
            self.config.tile_size,
            self.config.blending_threshold,
        )?;

        let mut videos = Vec::with_capacity(self.list.sessions.len());
        for session in &self.list.sessions {
            info!("Processing session {session}");
            let (session_folder, timeline) = self.prepare_session(session)?;
            for clip in timeline.clips() {
                stitcher.check_frame_size(clip.camera_name(), clip.source().frame_size())?;
            }

            let video_path = session_folder.join(PANO_VIDEO_FILE);
            let mut sink =
                self.backend
                    .create_sink(&video_path, stitcher.canvas(), self.config.fps)?;
            let frames =
                timeline.generate_panorama(&stitcher, self.config.fps, sink.as_mut(), face_detector)?;
            info!("Wrote {frames} frames to {}", video_path.display());
            videos.push(video_path);
        }
        Ok(videos)
    }

    /// Save `<output>/<session>/<camera>/NNNNNN.jpg` every `1 / sample_rate`
    /// seconds where all cameras have a frame.
    ///
    /// Numbering starts at `SampleStartIndex` and continues across sessions.
    /// Returns the number of sampled time steps.
    pub fn save_samples(&self, sample_rate: f64) -> Result<usize, PipelineError> {
        let mut next_index = self.list.sample_start_index;
        for session in &self.list.sessions {
            info!("Sampling session {session}");
            let (session_folder, timeline) = self.prepare_session(session)?;
            for camera in timeline.camera_names() {
                util::ensure_dir(&session_folder.join(camera))?;
            }

            timeline.collect_samples::<PipelineError, _>(
                self.config.sample_start_time,
                sample_rate,
                |samples| {
                    let image_name = format!("{next_index:06}.jpg");
                    for (camera, frame) in samples {
                        util::save_image(frame, &session_folder.join(camera).join(&image_name))?;
                    }
                    info!("{session} --> {image_name}");
                    next_index += 1;
                    Ok(())
                },
            )?;
        }
        Ok((next_index - self.list.sample_start_index) as usize)
    }
}

#[derive(Debug, Serialize)]
struct SynchReportRow<'a> {
    camera: &'a str,
    file: &'a str,
    offset: f64,
}

/// Align the clips of an explicit list and write `SynchedVideos.yaml` and
/// `synch_report.csv` into `output_folder`.
pub fn run_synchronization(
    parameters: &SynchParameters,
    output_folder: &Path,
    config: &PanoConfig,
    backend: &dyn MediaBackend,
) -> Result<SynchronizedVideos, PipelineError> {
    util::ensure_dir(output_folder)?;

    let mut timeline = CombinedVideoClip::load(parameters, false, backend)?;
    timeline.synchronize_with_audio(config.audio_sample_rate)?;
    timeline.save_synchronization_result(&output_folder.join(SYNCH_RESULT_FILE))?;

    let result = timeline.synchronization_result();
    let rows: Vec<_> = result
        .videos
        .iter()
        .map(|video| SynchReportRow {
            camera: &video.camera_name,
            file: &video.file,
            offset: video.offset,
        })
        .collect();
    let report = output_folder.join(SYNCH_REPORT_FILE);
    util::export_csv(&rows, &report)?;
    info!("Saved synchronization report to {}", report.display());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ocam::tests::sample_params;
    use crate::camera::{OcamModel, Resolution};
    use crate::media::testing::{noise, MockBackend, MockClip};
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    /// `cam0/` and `cam1/` both holding `1.MP4` and `2.mp4`.
    fn recording_folders() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        for camera in ["cam0", "cam1"] {
            let folder = dir.path().join(camera);
            fs::create_dir(&folder).unwrap();
            fs::write(folder.join("1.MP4"), b"").unwrap();
            fs::write(folder.join("2.mp4"), b"").unwrap();
        }
        fs::write(dir.path().join("cam0").join("notes.txt"), b"").unwrap();

        let list = dir.path().join("videos.yaml");
        fs::write(
            &list,
            format!(
                "%YAML:1.0\nVideos:\n  - {{ CameraName: cam0, Folder: \"{}\" }}\n  - {{ CameraName: cam1, Folder: \"{}\" }}\nMaxShift: 1\nSampleStartIndex: 7\n",
                dir.path().join("cam0").display(),
                dir.path().join("cam1").display()
            ),
        )
        .unwrap();
        (dir, list)
    }

    fn small_config() -> PanoConfig {
        PanoConfig {
            canvas_width: 40,
            canvas_height: 20,
            fps: 10,
            audio_sample_rate: 100,
            sample_start_time: 0.5,
            ..PanoConfig::default()
        }
    }

    fn backend(frame_count: usize) -> MockBackend {
        let clip = MockClip::new(frame_count, 10.0, [90, 90]).with_audio(noise(400, 11));
        MockBackend::default()
            .with_clip("1.MP4", clip.clone())
            .with_clip("2.mp4", clip)
    }

    #[test]
    fn test_video_list_enumerates_sessions() {
        let (dir, path) = recording_folders();
        fs::write(dir.path().join("cam1").join("3.MP4"), b"").unwrap();

        let list = VideoList::load(&path).unwrap();
        assert_eq!(list.sessions, vec!["1.MP4", "2.mp4", "3.MP4"]);
        assert_eq!(list.max_shift, Some(1.0));
        assert_eq!(list.sample_start_index, 7);
        assert_eq!(list.cameras[1].camera_name, "cam1");

        let parameters = list.session_parameters("3.MP4", 5.0);
        assert_eq!(parameters.max_shift, 1.0);
        assert_eq!(parameters.entries[0].file, dir.path().join("cam0").join("3.MP4"));
        assert_eq!(parameters.entries[1].camera_name, "cam1");
    }

    #[test]
    fn test_video_list_errors_and_defaults() {
        let dir = tempdir().unwrap();
        let doc = util::parse_yaml_document(&format!(
            "Videos:\n  - {{ CameraName: cam0, Folder: \"{}\" }}\n",
            dir.path().join("missing").display()
        ))
        .unwrap();
        assert!(matches!(
            VideoList::from_yaml(&doc),
            Err(PipelineError::Configuration(_))
        ));

        let doc = util::parse_yaml_document(&format!(
            "Videos:\n  - {{ CameraName: cam0, Folder: \"{}\" }}\n",
            dir.path().display()
        ))
        .unwrap();
        let list = VideoList::from_yaml(&doc).unwrap();
        assert!(list.sessions.is_empty());
        assert_eq!(list.max_shift, None);
        assert_eq!(list.sample_start_index, 0);
        assert_eq!(list.session_parameters("1.MP4", 4.0).max_shift, 4.0);

        let doc = util::parse_yaml_document("Videos: []\n").unwrap();
        assert!(VideoList::from_yaml(&doc).is_err());
    }

    #[test]
    fn test_generate_pano_writes_every_session() {
        let (dir, path) = recording_folders();
        let output = dir.path().join("out");
        fs::create_dir(&output).unwrap();
        fs::write(output.join("stale.txt"), b"").unwrap();

        let rig = CameraRig::from_models(
            ["cam0", "cam1"]
                .iter()
                .map(|name| OcamModel::new(sample_params(name, [0.0; 6])).unwrap()),
        )
        .unwrap();
        let mapper = PanoVideoMapper::new(
            &output,
            VideoList::load(&path).unwrap(),
            small_config(),
            backend(5),
        )
        .unwrap();

        let videos = mapper.generate_pano(&rig, None).unwrap();
        assert_eq!(
            videos,
            vec![output.join("1").join(PANO_VIDEO_FILE), output.join("2").join(PANO_VIDEO_FILE)]
        );
        assert_eq!(
            mapper.backend().written(),
            vec![(videos[0].clone(), 5), (videos[1].clone(), 5)]
        );
        assert!(!output.join("stale.txt").exists());

        let synched = SynchParameters::load_from_yaml(&output.join("1").join(SYNCH_RESULT_FILE)).unwrap();
        assert_eq!(synched.max_shift, 1.0);
        assert_eq!(synched.entries.len(), 2);
        assert!(synched.entries.iter().all(|entry| entry.offset == 0.0));
    }

    #[test]
    fn test_generate_pano_requires_calibrated_cameras() {
        let (dir, path) = recording_folders();
        let rig = CameraRig::from_models([OcamModel::new(sample_params("cam0", [0.0; 6])).unwrap()])
            .unwrap();
        let mapper = PanoVideoMapper::new(
            dir.path().join("out"),
            VideoList::load(&path).unwrap(),
            small_config(),
            backend(5),
        )
        .unwrap();
        assert!(matches!(
            mapper.generate_pano(&rig, None),
            Err(PipelineError::Camera(CameraModelError::UnknownCamera(_)))
        ));
    }

    #[test]
    fn test_generate_pano_rejects_uncalibrated_frame_size() {
        let (dir, path) = recording_folders();
        let rig = CameraRig::from_models(
            ["cam0", "cam1"]
                .iter()
                .map(|name| OcamModel::new(sample_params(name, [0.0; 6])).unwrap()),
        )
        .unwrap();
        let mut small = MockClip::new(5, 10.0, [90, 90]).with_audio(noise(400, 11));
        small.size = Resolution::new(50, 50);
        let mapper = PanoVideoMapper::new(
            dir.path().join("out"),
            VideoList::load(&path).unwrap(),
            small_config(),
            MockBackend::default()
                .with_clip("1.MP4", small.clone())
                .with_clip("2.mp4", small),
        )
        .unwrap();

        assert!(matches!(
            mapper.generate_pano(&rig, None),
            Err(PipelineError::Stitch(StitchError::FrameSizeMismatch { .. }))
        ));
        assert!(mapper.backend().written().is_empty());
    }

    #[test]
    fn test_pano_then_samples_keeps_videos() {
        let (dir, path) = recording_folders();
        let output = dir.path().join("out");
        let rig = CameraRig::from_models(
            ["cam0", "cam1"]
                .iter()
                .map(|name| OcamModel::new(sample_params(name, [0.0; 6])).unwrap()),
        )
        .unwrap();
        let mapper = PanoVideoMapper::new(
            &output,
            VideoList::load(&path).unwrap(),
            small_config(),
            backend(30),
        )
        .unwrap();

        let videos = mapper.generate_pano(&rig, None).unwrap();
        // The mock sink writes nothing, stand in for the encoder output.
        for video in &videos {
            fs::write(video, b"video").unwrap();
        }
        assert_eq!(mapper.save_samples(2.0).unwrap(), 10);

        for video in &videos {
            assert!(video.is_file());
        }
        assert!(output.join("1").join("cam0").join("000007.jpg").is_file());
        assert!(output.join("2").join(SYNCH_RESULT_FILE).is_file());
    }

    #[test]
    fn test_save_samples_numbers_across_sessions() {
        let (dir, path) = recording_folders();
        let output = dir.path().join("samples");
        let mapper = PanoVideoMapper::new(
            &output,
            VideoList::load(&path).unwrap(),
            small_config(),
            backend(30),
        )
        .unwrap();

        // Clips last 3s: samples at 0.5, 1.0, ..., 2.5 in each session.
        assert_eq!(mapper.save_samples(2.0).unwrap(), 10);
        for camera in ["cam0", "cam1"] {
            assert!(output.join("1").join(camera).join("000007.jpg").is_file());
            assert!(output.join("1").join(camera).join("000011.jpg").is_file());
            assert!(output.join("2").join(camera).join("000012.jpg").is_file());
            assert!(output.join("2").join(camera).join("000016.jpg").is_file());
        }
        assert!(!output.join("2").join("cam0").join("000017.jpg").exists());
        assert!(output.join("2").join(SYNCH_RESULT_FILE).is_file());
    }

    #[test]
    fn test_missing_session_file_fails() {
        let (dir, path) = recording_folders();
        fs::write(dir.path().join("cam1").join("3.MP4"), b"").unwrap();
        let mapper = PanoVideoMapper::new(
            dir.path().join("out"),
            VideoList::load(&path).unwrap(),
            small_config(),
            backend(30).with_clip("3.MP4", MockClip::new(30, 10.0, [0, 0])),
        )
        .unwrap();
        assert!(matches!(
            mapper.save_samples(2.0),
            Err(PipelineError::Timeline(TimelineError::MissingFile(_)))
        ));
    }

    #[test]
    fn test_run_synchronization_writes_report() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.MP4");
        let b = dir.path().join("b.MP4");
        fs::write(&a, b"").unwrap();
        fs::write(&b, b"").unwrap();

        // b starts one second after a.
        let signal = noise(600, 5);
        let backend = MockBackend::default()
            .with_clip("a.MP4", MockClip::new(10, 10.0, [0, 0]).with_audio(signal.clone()))
            .with_clip("b.MP4", MockClip::new(10, 10.0, [0, 0]).with_audio(signal[100..].to_vec()));
        let parameters = SynchParameters::new(
            vec![
                SynchEntry {
                    file: a,
                    camera_name: "cam0".to_string(),
                    offset: 0.0,
                },
                SynchEntry {
                    file: b,
                    camera_name: "cam1".to_string(),
                    offset: 0.0,
                },
            ],
            2.0,
        );
        let output = dir.path().join("synch");

        let result = run_synchronization(&parameters, &output, &small_config(), &backend).unwrap();
        assert_eq!(result.videos[0].offset, 0.0);
        assert_relative_eq!(result.videos[1].offset, 1.0, epsilon = 0.01);

        let report = fs::read_to_string(output.join(SYNCH_REPORT_FILE)).unwrap();
        let mut lines = report.lines();
        assert_eq!(lines.next(), Some("camera,file,offset"));
        assert!(lines.next().is_some_and(|line| line.starts_with("cam0,")));
        assert!(lines.next().is_some_and(|line| line.starts_with("cam1,")));

        let saved = SynchParameters::load_from_yaml(&output.join(SYNCH_RESULT_FILE)).unwrap();
        assert_relative_eq!(saved.entries[1].offset, 1.0, epsilon = 0.01);
    }
}

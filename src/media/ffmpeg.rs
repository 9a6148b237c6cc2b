//! `ffmpeg`/`ffprobe` subprocess implementation of the media traits.
//!
//! Frames are decoded as raw `rgb24` from a long-running `ffmpeg` process that
//! is restarted with a seek only when the requested time jumps backwards or
//! too far ahead. Audio is decoded once per call as mono `f32le`.

use crate::camera::Resolution;
use crate::media::{AudioSource, ClipSource, FrameSink, FrameSource, MediaBackend, MediaError};
use image::RgbImage;
use log::{debug, warn};
use serde::Deserialize;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Mutex;

/// Forward jumps longer than this restart the decoder with a seek.
const MAX_SEQUENTIAL_SKIP_SECONDS: f64 = 2.0;

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeInfo {
    pub size: Resolution,
    pub fps: f64,
    pub duration: f64,
    pub has_audio: bool,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

pub fn probe(path: &Path) -> Result<ProbeInfo, MediaError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|_| MediaError::ToolNotFound("ffprobe".to_string()))?;
    if !output.status.success() {
        return Err(MediaError::Probe {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    parse_probe_output(path, &output.stdout)
}

fn parse_probe_output(path: &Path, json: &[u8]) -> Result<ProbeInfo, MediaError> {
    let probe_error = |reason: String| MediaError::Probe {
        path: path.to_path_buf(),
        reason,
    };
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| probe_error(format!("invalid json: {e}")))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::NoVideoStream(path.to_path_buf()))?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(probe_error("missing video dimensions".to_string())),
    };
    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| probe_error("invalid frame rate".to_string()))?;
    let duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(ProbeInfo {
        size: Resolution::new(width, height),
        fps,
        duration,
        has_audio,
    })
}

fn parse_frame_rate(ratio: &str) -> Option<f64> {
    let (num, den) = ratio.split_once('/')?;
    let num = num.parse::<f64>().ok()?;
    let den = den.parse::<f64>().ok()?;
    if num <= 0.0 || den <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Whether a decoder whose next frame is at `position` can reach
/// `local_time` by reading forward.
fn can_reuse_decoder(position: f64, local_time: f64, frame_period: f64) -> bool {
    local_time >= position - frame_period / 2.0
        && local_time - position <= MAX_SEQUENTIAL_SKIP_SECONDS
}

/// Whether the frame at `frame_time` is the nearest one to `local_time`
/// among it and its successors.
fn is_frame_for(frame_time: f64, frame_period: f64, local_time: f64) -> bool {
    frame_time + frame_period / 2.0 > local_time
}

/// End of the frame pipe: a clean exit is the end of the clip, anything
/// else is a decode failure.
fn decoder_exit(path: &Path, status: ExitStatus, stderr: &[u8]) -> Result<(), MediaError> {
    if status.success() {
        return Ok(());
    }
    Err(MediaError::Decode(format!(
        "ffmpeg failed decoding {}: {status}: {}",
        path.display(),
        String::from_utf8_lossy(stderr).trim()
    )))
}

/// A running `ffmpeg` process emitting consecutive raw frames.
struct DecodeStream {
    path: PathBuf,
    child: Child,
    stdout: ChildStdout,
    // `-v error` keeps this small enough not to block the pipe.
    stderr: Option<ChildStderr>,
    /// Clip time of the next frame on `stdout`.
    position: f64,
}

impl DecodeStream {
    fn can_serve(&self, local_time: f64, frame_period: f64) -> bool {
        can_reuse_decoder(self.position, local_time, frame_period)
    }

    fn read_frame(&mut self, size: Resolution) -> Result<Option<RgbImage>, MediaError> {
        let mut buffer = vec![0u8; size.pixel_count() * 3];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finish()?;
                return Ok(None);
            }
            Err(e) => return Err(MediaError::Decode(format!("failed to read frame: {e}"))),
        }
        RgbImage::from_raw(size.width, size.height, buffer)
            .map(Some)
            .ok_or_else(|| MediaError::Decode("frame buffer has the wrong size".to_string()))
    }

    fn finish(&mut self) -> Result<(), MediaError> {
        let mut stderr = Vec::new();
        if let Some(mut pipe) = self.stderr.take() {
            pipe.read_to_end(&mut stderr)
                .map_err(|e| MediaError::Decode(format!("failed to read ffmpeg stderr: {e}")))?;
        }
        let status = self
            .child
            .wait()
            .map_err(|e| MediaError::Decode(format!("failed to wait for ffmpeg: {e}")))?;
        decoder_exit(&self.path, status, &stderr)
    }
}

impl Drop for DecodeStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A video file decoded through `ffmpeg`.
pub struct FfmpegClip {
    path: PathBuf,
    info: ProbeInfo,
    stream: Mutex<Option<DecodeStream>>,
}

impl FfmpegClip {
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        let info = probe(path)?;
        debug!(
            "Opened {}: {}x{} @ {:.3} fps, {:.2}s, audio: {}",
            path.display(),
            info.size.width,
            info.size.height,
            info.fps,
            info.duration,
            info.has_audio
        );
        Ok(Self {
            path: path.to_path_buf(),
            info,
            stream: Mutex::new(None),
        })
    }

    fn spawn_decoder(&self, start_time: f64) -> Result<DecodeStream, MediaError> {
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", format!("{start_time:.6}").as_str()])
            .arg("-i")
            .arg(&self.path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| MediaError::ToolNotFound("ffmpeg".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Decode("failed to open ffmpeg stdout".to_string()))?;
        let stderr = child.stderr.take();
        Ok(DecodeStream {
            path: self.path.clone(),
            child,
            stdout,
            stderr,
            position: start_time,
        })
    }
}

impl FrameSource for FfmpegClip {
    fn frame_size(&self) -> Resolution {
        self.info.size
    }

    fn read_frame_at(&self, local_time: f64) -> Result<Option<RgbImage>, MediaError> {
        if local_time < 0.0 {
            return Ok(None);
        }
        let frame_period = 1.0 / self.info.fps;
        let mut guard = self
            .stream
            .lock()
            .map_err(|_| MediaError::Decode("decoder lock poisoned".to_string()))?;

        let stream = match guard.take() {
            Some(stream) if stream.can_serve(local_time, frame_period) => stream,
            _ => self.spawn_decoder(local_time)?,
        };
        let stream = guard.insert(stream);

        loop {
            let Some(frame) = stream.read_frame(self.info.size)? else {
                return Ok(None);
            };
            let frame_time = stream.position;
            stream.position += frame_period;
            if is_frame_for(frame_time, frame_period, local_time) {
                return Ok(Some(frame));
            }
        }
    }
}

impl AudioSource for FfmpegClip {
    fn extract_audio(&self, duration: f64, sample_rate: u32) -> Result<Vec<f32>, MediaError> {
        if !self.info.has_audio {
            return Err(MediaError::NoAudioTrack(self.path.clone()));
        }
        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(&self.path)
            .args([
                "-vn",
                "-t",
                format!("{duration:.6}").as_str(),
                "-ac",
                "1",
                "-ar",
                sample_rate.to_string().as_str(),
                "-f",
                "f32le",
                "-acodec",
                "pcm_f32le",
                "pipe:1",
            ])
            .output()
            .map_err(|_| MediaError::ToolNotFound("ffmpeg".to_string()))?;
        if !output.status.success() {
            return Err(MediaError::Decode(format!(
                "audio decode failed for {}: {}",
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        decode_f32le(&output.stdout)
    }
}

fn decode_f32le(bytes: &[u8]) -> Result<Vec<f32>, MediaError> {
    if bytes.len() % 4 != 0 {
        return Err(MediaError::Decode(
            "decoded audio is not aligned to f32 samples".to_string(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encodes `rgb24` frames to an H.264 MP4 through an `ffmpeg` pipe.
pub struct FfmpegEncoder {
    size: Resolution,
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegEncoder {
    pub fn new(path: &Path, size: Resolution, fps: u32) -> Result<Self, MediaError> {
        if size.is_empty() || size.width % 2 != 0 || size.height % 2 != 0 {
            return Err(MediaError::Encode(format!(
                "frame size must be even and non-zero for yuv420p, got {}x{}",
                size.width, size.height
            )));
        }
        if fps == 0 {
            return Err(MediaError::Encode("fps must be non-zero".to_string()));
        }
        if !is_ffmpeg_on_path() {
            return Err(MediaError::ToolNotFound("ffmpeg".to_string()));
        }

        let mut child = Command::new("ffmpeg")
            .args([
                "-y",
                "-loglevel",
                "error",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                format!("{}x{}", size.width, size.height).as_str(),
                "-r",
                fps.to_string().as_str(),
                "-i",
                "pipe:0",
                "-an",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::Encode(format!("failed to spawn ffmpeg: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Encode("failed to open ffmpeg stdin".to_string()))?;

        Ok(Self {
            size,
            path: path.to_path_buf(),
            child: Some(child),
            stdin: Some(stdin),
        })
    }
}

impl FrameSink for FfmpegEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        let actual = Resolution::new(frame.width(), frame.height());
        if actual != self.size {
            return Err(MediaError::FrameSizeMismatch {
                expected: self.size,
                actual,
            });
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MediaError::Encode("encoder is already finished".to_string()));
        };
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| MediaError::Encode(format!("failed to write frame to ffmpeg: {e}")))
    }

    fn finish(&mut self) -> Result<(), MediaError> {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child
            .wait_with_output()
            .map_err(|e| MediaError::Encode(format!("failed to wait for ffmpeg: {e}")))?;
        if !output.status.success() {
            return Err(MediaError::Encode(format!(
                "ffmpeg exited with status {} while writing {}: {}",
                output.status,
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("Encoder for {} dropped before finish", self.path.display());
            drop(self.stdin.take());
            let _ = child.wait();
        }
    }
}

/// [`MediaBackend`] backed by the system `ffmpeg` binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn open_clip(&self, path: &Path) -> Result<Box<dyn ClipSource>, MediaError> {
        Ok(Box::new(FfmpegClip::open(path)?))
    }

    fn create_sink(
        &self,
        path: &Path,
        size: Resolution,
        fps: u32,
    ) -> Result<Box<dyn FrameSink>, MediaError> {
        Ok(Box::new(FfmpegEncoder::new(path, size, fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "30000/1001"},
            {"codec_type": "audio", "sample_rate": "48000"}
        ],
        "format": {"duration": "12.5"}
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(Path::new("a.mp4"), PROBE_JSON.as_bytes()).unwrap();
        assert_eq!(info.size, Resolution::new(1920, 1080));
        assert!((info.fps - 29.97).abs() < 1e-2);
        assert_eq!(info.duration, 12.5);
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let json = r#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_probe_output(Path::new("a.mp4"), json.as_bytes()),
            Err(MediaError::NoVideoStream(_))
        ));
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_decode_f32le() {
        let bytes: Vec<u8> = [0.5f32, -1.0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(decode_f32le(&bytes).unwrap(), vec![0.5, -1.0]);
        assert!(decode_f32le(&bytes[..5]).is_err());
    }

    #[test]
    fn test_decoder_reuse_window() {
        let period = 0.1;
        // Backward seeks restart the decoder.
        assert!(!can_reuse_decoder(5.0, 4.0, period));
        // Half a period behind still rounds to the next frame.
        assert!(can_reuse_decoder(5.0, 4.96, period));
        assert!(!can_reuse_decoder(5.0, 4.94, period));
        assert!(can_reuse_decoder(5.0, 5.0, period));
        assert!(can_reuse_decoder(5.0, 5.0 + MAX_SEQUENTIAL_SKIP_SECONDS, period));
        assert!(!can_reuse_decoder(5.0, 7.01, period));
    }

    #[test]
    fn test_nearest_frame_selection() {
        let period = 0.1;
        assert!(is_frame_for(1.0, period, 1.0));
        assert!(is_frame_for(1.0, period, 1.04));
        assert!(!is_frame_for(1.0, period, 1.06));
        assert!(is_frame_for(1.1, period, 1.06));
        assert!(is_frame_for(2.0, period, 1.0));
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let path = Path::new("clip.mp4");
        assert!(decoder_exit(path, ExitStatus::from_raw(0), b"").is_ok());

        match decoder_exit(path, ExitStatus::from_raw(1 << 8), b"moov atom not found\n") {
            Err(MediaError::Decode(message)) => {
                assert!(message.contains("clip.mp4"));
                assert!(message.contains("moov atom not found"));
            }
            other => panic!("expected a decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_encoder_rejects_odd_sizes() {
        assert!(matches!(
            FfmpegEncoder::new(Path::new("out.mp4"), Resolution::new(101, 100), 30),
            Err(MediaError::Encode(_))
        ));
        assert!(FfmpegEncoder::new(Path::new("out.mp4"), Resolution::new(100, 100), 0).is_err());
    }
}

//! Audio cross-correlation time alignment of independently recorded clips.
//!
//! The first clip is the reference. Every other clip is correlated against
//! it, and the resulting shifts are offset so that the earliest-starting
//! clip ends up at shift 0:
//!
//! ```text
//! shift_i = (argmax_lag corr(ref_padded, clip_i) - pad) / rate
//! final_i = shift_i - min(0, min_j shift_j)
//! ```
//!
//! A positive shift means the clip started recording later than the
//! earliest one: its local time 0 sits at `shift` on the global timeline.

use crate::media::{AudioSource, MediaError};
use crate::util::{self, yaml, UtilError};
use log::{debug, info};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use yaml_rust::Yaml;

/// Shift window used when a video list does not set `MaxShift`.
pub const DEFAULT_MAX_SHIFT: f64 = 5.0;

#[derive(thiserror::Error, Debug)]
pub enum SynchError {
    #[error("Synchronization needs at least 2 clips, got {0}")]
    NotEnoughClips(usize),
    #[error("No audio samples decoded from {0}")]
    EmptyAudio(String),
    #[error("Audio sample rate must be positive")]
    InvalidSampleRate,
    #[error("Audio window must be positive, got {0} seconds")]
    InvalidWindow(f64),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Invalid video list: {0}")]
    Parameters(#[from] UtilError),
}

/// Mono audio samples from the start of one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode the first `duration` seconds of `source` at `sample_rate`.
pub fn extract_audio_window<A: AudioSource + ?Sized>(
    source: &A,
    label: &str,
    duration: f64,
    sample_rate: u32,
) -> Result<AudioWindow, SynchError> {
    if sample_rate == 0 {
        return Err(SynchError::InvalidSampleRate);
    }
    if duration.is_nan() || duration <= 0.0 {
        return Err(SynchError::InvalidWindow(duration));
    }
    let mut samples = source.extract_audio(duration, sample_rate)?;
    if samples.is_empty() {
        return Err(SynchError::EmptyAudio(label.to_string()));
    }
    samples.truncate((duration * sample_rate as f64).round() as usize);
    debug!("Extracted {} audio samples from {label}", samples.len());
    Ok(AudioWindow {
        samples,
        sample_rate,
    })
}

/// Unnormalized cross-correlation of `candidate` over `reference` zero-padded
/// by `candidate.len()` on both sides.
///
/// Entry `lag` is `Σ_j padded[lag + j] * candidate[j]`, for every lag where
/// the candidate fits inside the padded reference.
pub fn cross_correlate(reference: &[f32], candidate: &[f32]) -> Vec<f64> {
    let pad = candidate.len();
    let padded_len = reference.len() + 2 * pad;
    let lags = padded_len - candidate.len() + 1;

    (0..lags)
        .into_par_iter()
        .map(|lag| {
            let start = pad.saturating_sub(lag);
            let end = (reference.len() + pad).saturating_sub(lag).min(candidate.len());
            (start..end)
                .map(|j| reference[lag + j - pad] as f64 * candidate[j] as f64)
                .sum::<f64>()
        })
        .collect()
}

/// Shift in seconds of `candidate` relative to `reference`.
pub fn estimate_lag(reference: &[f32], candidate: &[f32], sample_rate: u32) -> Result<f64, SynchError> {
    if sample_rate == 0 {
        return Err(SynchError::InvalidSampleRate);
    }
    let correlation = cross_correlate(reference, candidate);
    let mut best_lag = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (lag, value) in correlation.iter().enumerate() {
        if *value > best_value {
            best_lag = lag;
            best_value = *value;
        }
    }
    let pad = candidate.len() as f64;
    Ok((best_lag as f64 - pad) / sample_rate as f64)
}

/// Shifts of every window against the first one, all `>= 0`.
pub fn synchronize_all(windows: &[AudioWindow]) -> Result<Vec<f64>, SynchError> {
    if windows.len() < 2 {
        return Err(SynchError::NotEnoughClips(windows.len()));
    }
    let reference = &windows[0].samples;

    let mut shifts = vec![0.0];
    for window in &windows[1..] {
        shifts.push(estimate_lag(reference, &window.samples, window.sample_rate)?);
    }

    let max_leading = shifts.iter().copied().fold(0.0, f64::min);
    Ok(shifts.into_iter().map(|shift| shift - max_leading).collect())
}

/// One clip of an explicit video list.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchEntry {
    pub file: PathBuf,
    pub camera_name: String,
    /// Known offset in seconds, used as is when the clips are already synchronized.
    pub offset: f64,
}

/// Clips to align and the largest shift between them, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchParameters {
    pub entries: Vec<SynchEntry>,
    pub max_shift: f64,
}

impl SynchParameters {
    pub fn new(entries: Vec<SynchEntry>, max_shift: f64) -> Self {
        Self { entries, max_shift }
    }

    /// Read `Videos: [{File, CameraName, Offset?}]` and `MaxShift?`.
    pub fn load_from_yaml(path: &Path) -> Result<Self, SynchError> {
        let doc = util::load_yaml_document(path)?;
        let parameters = Self::from_yaml(&doc)?;
        info!(
            "Loaded {} videos from {} (max shift {}s)",
            parameters.entries.len(),
            path.display(),
            parameters.max_shift
        );
        Ok(parameters)
    }

    pub fn from_yaml(doc: &Yaml) -> Result<Self, SynchError> {
        let max_shift = yaml::get_optional_f64(doc, "MaxShift")?.unwrap_or(DEFAULT_MAX_SHIFT);
        let entries = yaml::get_seq(doc, "Videos")?
            .iter()
            .map(|node| {
                Ok(SynchEntry {
                    file: PathBuf::from(yaml::get_str(node, "File")?),
                    camera_name: yaml::get_str(node, "CameraName")?,
                    offset: yaml::get_optional_f64(node, "Offset")?.unwrap_or(0.0),
                })
            })
            .collect::<Result<Vec<_>, UtilError>>()?;
        Ok(Self { entries, max_shift })
    }

    /// Length of the audio window compared between clips.
    pub fn window_duration(&self) -> f64 {
        self.max_shift * 2.0
    }
}

//! Fisheye panorama video tool
//!
//! Synchronizes the recordings of a fisheye camera rig on their audio
//! tracks, then either stitches them into panorama videos or saves
//! synchronized per-camera sample images.
//!
//! Usage:
//! ```bash
//! # panorama videos for every session of a folder-per-camera list
//! fisheye-pano output/ videos.yaml --calibration rig.yaml --pano
//!
//! # one synchronized sample image per camera every half second
//! fisheye-pano output/ videos.yaml --sample-rate 2
//!
//! # offsets only, for an explicit list of files
//! fisheye-pano output/ synch_list.yaml --synch-only
//! ```

use clap::Parser;
use fisheye_pano::media::{ffmpeg, FfmpegBackend};
use fisheye_pano::{
    run_synchronization, CameraRig, PanoConfig, PanoVideoMapper, SynchParameters, VideoList,
};
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info, warn};
use std::path::PathBuf;

/// Fisheye rig panorama stitcher
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Folder receiving the results
    output: PathBuf,

    /// Video list file (folder-per-camera list, or explicit list with --synch-only)
    videos: PathBuf,

    /// Rig calibration file
    #[arg(short = 'c', long)]
    calibration: Option<PathBuf>,

    /// Generate panorama videos (requires --calibration)
    #[arg(long)]
    pano: bool,

    /// Save synchronized sample images at this rate in Hz, 0 disables sampling
    #[arg(short = 's', long, default_value_t = 0.0)]
    sample_rate: f64,

    /// Only synchronize the clips of an explicit video list
    #[arg(long)]
    synch_only: bool,

    /// Optional YAML file overriding the default settings
    #[arg(long)]
    config: Option<PathBuf>,
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => PanoConfig::load_from_yaml(path)?,
        None => PanoConfig::default(),
    };
    info!("Settings: {:?}", config);

    if !ffmpeg::is_ffmpeg_on_path() {
        warn!("ffmpeg was not found on PATH, decoding will fail");
    }

    if cli.synch_only {
        let parameters = SynchParameters::load_from_yaml(&cli.videos)?;
        let result = run_synchronization(&parameters, &cli.output, &config, &FfmpegBackend)?;
        for video in &result.videos {
            info!("{}: {} seconds ({})", video.camera_name, video.offset, video.file);
        }
        return Ok(());
    }

    if !cli.pano && cli.sample_rate <= 0.0 {
        return Err("Nothing to do: pass --pano and/or a positive --sample-rate".into());
    }

    let list = VideoList::load(&cli.videos)?;
    let mapper = PanoVideoMapper::new(&cli.output, list, config, FfmpegBackend)?;

    if cli.pano {
        let calibration = cli
            .calibration
            .as_ref()
            .ok_or("--pano requires a --calibration file")?;
        let rig = CameraRig::load_from_yaml(calibration)?;
        let videos = mapper.generate_pano(&rig, None)?;
        info!("Generated {} panorama videos", videos.len());
    }

    if cli.sample_rate > 0.0 {
        let samples = mapper.save_samples(cli.sample_rate)?;
        info!("Saved {samples} synchronized samples");
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_env_or_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        // error;warn;info;debug;trace
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    info!("Output folder: {}", cli.output.display());
    info!("Video list: {}", cli.videos.display());

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
    Ok(())
}

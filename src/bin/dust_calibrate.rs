//! dust_calibrate - record a clean-scene calibration artifact.
//!
//! Run while the site is visibly dust-free. Captures `fps * seconds` frames from the
//! configured source and writes the contrast history and reference histogram.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use dust_monitor::calibration::{DEFAULT_CALIBRATION_FPS, DEFAULT_CALIBRATION_SECS};
use dust_monitor::config::MonitorConfig;
use dust_monitor::{open_source, CalibrationProfile, Calibrator};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture a dust calibration artifact")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "DUST_CONFIG")]
    config: Option<PathBuf>,

    /// Video source (defaults to the configured source).
    #[arg(long)]
    source: Option<String>,

    /// Output artifact path (defaults to the configured calibration path).
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_CALIBRATION_FPS)]
    fps: u32,

    #[arg(long, default_value_t = DEFAULT_CALIBRATION_SECS)]
    seconds: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.locator = source;
    }
    let output = args.output.unwrap_or_else(|| cfg.calibration_path.clone());

    let mut source = open_source(&cfg.source)
        .with_context(|| format!("build video source {}", cfg.source.locator))?;
    source
        .connect()
        .with_context(|| format!("open video source {}", cfg.source.locator))?;
    log::info!(
        "recording {}s at {} fps from {}",
        args.seconds,
        args.fps,
        cfg.source.locator
    );
    let artifact = Calibrator::new(args.fps, args.seconds).capture(source.as_mut());
    source.release();
    let artifact = artifact?;

    // Check the artifact loads before overwriting anything.
    let profile = CalibrationProfile::from_artifact(artifact.clone())?;
    artifact.save(&output)?;
    let range = profile.signal_range();
    log::info!(
        "calibration written to {}: signal range [{:.6}, {:.6}]",
        output.display(),
        range.min,
        range.max
    );
    Ok(())
}

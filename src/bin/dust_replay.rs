//! dust_replay - replay recorded signals into the simulation store.
//!
//! Uses the calibration artifact's signal history unless `--signals` names a JSON
//! array of raw signals. The history is always normalized as contrast. Exits non-zero if no simulation rows were added.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use dust_monitor::config::MonitorConfig;
use dust_monitor::{
    history_normalizer, replay, Algorithm, CalibrationProfile, Direction, Normalizer, SqliteReadingSink,
    TumblingWindow,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay recorded dust signals into the simulation store")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "DUST_CONFIG")]
    config: Option<PathBuf>,

    /// Calibration artifact (JSON).
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// JSON array of raw signals to replay instead of the calibration history.
    #[arg(long)]
    signals: Option<PathBuf>,

    /// Algorithm the recorded signals came from (selects the normalization range).
    #[arg(long)]
    algorithm: Option<Algorithm>,

    /// Override the severity direction.
    #[arg(long)]
    direction: Option<Direction>,

    /// Samples per smoothing window.
    #[arg(long)]
    window: Option<usize>,

    /// Passes over the recording.
    #[arg(long, default_value_t = 1)]
    passes: usize,

    /// Seed for window offsets (random when omitted).
    #[arg(long)]
    seed: Option<u64>,

    /// Simulation readings database.
    #[arg(long)]
    simulation_db: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(path) = args.calibration {
        cfg.calibration_path = path;
    }
    if let Some(algorithm) = args.algorithm {
        cfg.pipeline.algorithm = algorithm;
    }
    if args.direction.is_some() {
        cfg.pipeline.direction = args.direction;
    }
    if let Some(window) = args.window {
        cfg.pipeline.window = window;
    }
    if let Some(path) = args.simulation_db {
        cfg.storage.simulation_db = path;
    }
    cfg.validate()?;

    let profile = CalibrationProfile::load(&cfg.calibration_path)?;
    let (signals, normalizer) = match &args.signals {
        Some(path) => (
            read_signals(path)?,
            Normalizer::for_algorithm(cfg.pipeline.algorithm, &profile, cfg.pipeline.direction),
        ),
        None => {
            if cfg.pipeline.algorithm != Algorithm::Contrast {
                log::warn!(
                    "calibration history holds contrast signals; normalizing as contrast instead of {:?}",
                    cfg.pipeline.algorithm
                );
            }
            (
                profile.signal_history().to_vec(),
                history_normalizer(&profile, cfg.pipeline.direction),
            )
        }
    };
    log::info!(
        "replaying {} signals x {} passes (window {})",
        signals.len(),
        args.passes,
        cfg.pipeline.window
    );

    let mut window = TumblingWindow::new(cfg.pipeline.window)?;
    let mut sink = SqliteReadingSink::open(&cfg.storage.live_db, &cfg.storage.simulation_db)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let report = replay(
        &signals,
        &mut window,
        &normalizer,
        &mut sink,
        &mut rng,
        args.passes,
    )?;
    println!(
        "simulation rows {} -> {} ({} readings stored)",
        report.rows_before, report.rows_after, report.readings_persisted
    );
    Ok(())
}

fn read_signals(path: &PathBuf) -> Result<Vec<f64>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read signals {}", path.display()))?;
    let signals: Vec<f64> = serde_json::from_str(&raw)
        .with_context(|| format!("signals file {} must be a JSON array of numbers", path.display()))?;
    Ok(signals)
}

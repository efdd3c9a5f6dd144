//! dustd - live dust monitor.
//!
//! Reads frames from the configured source, estimates a 0..=100 dust level per
//! smoothing window and appends it to the live store. Type `s` + Enter to save a
//! snapshot of the current frame, `q` + Enter (or Ctrl-C) to stop.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use dust_monitor::config::MonitorConfig;
use dust_monitor::control::spawn_stdin_console;
use dust_monitor::{
    open_source, Algorithm, CalibrationProfile, CancellationToken, CommandActuator, Direction,
    FeatureExtractor, Monitor, MonitorSettings, Normalizer, SnapshotTrigger, SnapshotWriter,
    SqliteReadingSink, ThresholdAlert, TumblingWindow,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Estimate site dust levels from a camera feed")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "DUST_CONFIG")]
    config: Option<PathBuf>,

    /// Video source: stub://name, device index, /dev/videoN, stream URL or file.
    #[arg(long)]
    source: Option<String>,

    /// Calibration artifact (JSON).
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Signal extractor: contrast or histogram.
    #[arg(long)]
    algorithm: Option<Algorithm>,

    /// Frames per smoothing window.
    #[arg(long)]
    window: Option<usize>,

    /// Override the severity direction (higher_is_clearer or higher_is_dustier).
    #[arg(long)]
    direction: Option<Direction>,

    /// Live readings database.
    #[arg(long)]
    live_db: Option<PathBuf>,

    /// Log readings without writing them to the live store.
    #[arg(long)]
    no_persist: bool,

    /// Seconds to wait before reopening a failed source.
    #[arg(long)]
    backoff_secs: Option<u64>,

    /// Do not read operator commands from stdin.
    #[arg(long)]
    no_console: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.locator = source;
    }
    if let Some(path) = args.calibration {
        cfg.calibration_path = path;
    }
    if let Some(algorithm) = args.algorithm {
        cfg.pipeline.algorithm = algorithm;
    }
    if let Some(window) = args.window {
        cfg.pipeline.window = window;
    }
    if args.direction.is_some() {
        cfg.pipeline.direction = args.direction;
    }
    if let Some(path) = args.live_db {
        cfg.storage.live_db = path;
    }
    if args.no_persist {
        cfg.storage.persist_live = false;
    }
    if let Some(secs) = args.backoff_secs {
        cfg.backoff = Duration::from_secs(secs);
    }
    cfg.validate()?;

    let profile = CalibrationProfile::load(&cfg.calibration_path)?;
    let range = profile.signal_range();
    log::info!(
        "calibration {}: signal range [{:.6}, {:.6}]",
        cfg.calibration_path.display(),
        range.min,
        range.max
    );

    let extractor = FeatureExtractor::new(cfg.pipeline.algorithm, &profile);
    let normalizer =
        Normalizer::for_algorithm(cfg.pipeline.algorithm, &profile, cfg.pipeline.direction);
    let window = TumblingWindow::new(cfg.pipeline.window)?;
    let sink = SqliteReadingSink::open(&cfg.storage.live_db, &cfg.storage.simulation_db)?;
    let source = open_source(&cfg.source)
        .with_context(|| format!("build video source {}", cfg.source.locator))?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_token.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    let trigger = SnapshotTrigger::default();
    if !args.no_console {
        // Detached: the console thread blocks on stdin until EOF.
        let _ = spawn_stdin_console(token.clone(), trigger.clone());
    }

    let mut monitor = Monitor::new(source, extractor, window, normalizer, sink)
        .with_settings(MonitorSettings {
            backoff: cfg.backoff,
            persist: cfg.storage.persist_live,
        })
        .with_snapshots(SnapshotWriter::new(&cfg.snapshot_dir), trigger);

    if let Some(alert) = &cfg.alert {
        let actuator = CommandActuator::new(&alert.on_command, &alert.off_command)?;
        log::info!("alert enabled at dust level {:.1}", alert.threshold);
        monitor = monitor.with_alert(ThresholdAlert::new(alert.threshold, Box::new(actuator)));
    }

    let stats = monitor.run(&token)?;
    log::info!(
        "dustd exiting: {} frames, {} readings ({} stored, {} dropped), {} recoveries",
        stats.frames_processed,
        stats.readings_emitted,
        stats.readings_persisted,
        stats.readings_dropped,
        stats.recoveries
    );
    Ok(())
}

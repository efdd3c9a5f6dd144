use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::Algorithm;
use crate::ingest::VideoConfig;
use crate::severity::Direction;
use crate::smoothing::DEFAULT_WINDOW;
use crate::snapshot::DEFAULT_SNAPSHOT_DIR;

const DEFAULT_SOURCE_URL: &str = "rtsp://localhost:8554/mystream";
const DEFAULT_SOURCE_FPS: u32 = 7;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_CALIBRATION_PATH: &str = "params.json";
const DEFAULT_LIVE_DB: &str = "dust_data.db";
const DEFAULT_SIMULATION_DB: &str = "dust_data_simulation.db";
const DEFAULT_BACKOFF_SECS: u64 = 3;
const MAX_BACKOFF_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    source: Option<SourceConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    storage: Option<StorageConfigFile>,
    recovery: Option<RecoveryConfigFile>,
    snapshots: Option<SnapshotConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    algorithm: Option<Algorithm>,
    window: Option<usize>,
    direction: Option<Direction>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    live_db: Option<PathBuf>,
    simulation_db: Option<PathBuf>,
    persist_live: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RecoveryConfigFile {
    backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
struct AlertConfigFile {
    threshold: f64,
    on_command: PathBuf,
    off_command: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: VideoConfig,
    pub calibration_path: PathBuf,
    pub pipeline: PipelineSettings,
    pub storage: StorageSettings,
    pub backoff: Duration,
    pub snapshot_dir: PathBuf,
    pub alert: Option<AlertSettings>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub algorithm: Algorithm,
    pub window: usize,
    /// `None` keeps the algorithm's default direction.
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub live_db: PathBuf,
    pub simulation_db: PathBuf,
    pub persist_live: bool,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub threshold: f64,
    pub on_command: PathBuf,
    pub off_command: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// Defaults, then the TOML file named by `DUST_CONFIG` (if set), then `DUST_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("DUST_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file instead of `DUST_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        Self {
            source: VideoConfig {
                locator: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
            calibration_path: file
                .calibration
                .and_then(|c| c.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_PATH)),
            pipeline: PipelineSettings {
                algorithm: pipeline.algorithm.unwrap_or(Algorithm::Contrast),
                window: pipeline.window.unwrap_or(DEFAULT_WINDOW),
                direction: pipeline.direction,
            },
            storage: StorageSettings {
                live_db: storage
                    .live_db
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LIVE_DB)),
                simulation_db: storage
                    .simulation_db
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SIMULATION_DB)),
                persist_live: storage.persist_live.unwrap_or(true),
            },
            backoff: Duration::from_secs(
                file.recovery
                    .and_then(|r| r.backoff_secs)
                    .unwrap_or(DEFAULT_BACKOFF_SECS),
            ),
            snapshot_dir: file
                .snapshots
                .and_then(|s| s.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            alert: file.alert.map(|a| AlertSettings {
                threshold: a.threshold,
                on_command: a.on_command,
                off_command: a.off_command,
            }),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("DUST_SOURCE_URL") {
            self.source.locator = url;
        }
        if let Some(path) = non_empty_env("DUST_CALIBRATION_PATH") {
            self.calibration_path = PathBuf::from(path);
        }
        if let Some(algorithm) = non_empty_env("DUST_ALGORITHM") {
            self.pipeline.algorithm = algorithm
                .parse()
                .map_err(|e: String| anyhow!("DUST_ALGORITHM: {}", e))?;
        }
        if let Some(window) = non_empty_env("DUST_WINDOW") {
            self.pipeline.window = window
                .trim()
                .parse()
                .map_err(|_| anyhow!("DUST_WINDOW must be a positive integer"))?;
        }
        if let Some(path) = non_empty_env("DUST_LIVE_DB") {
            self.storage.live_db = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("DUST_SIMULATION_DB") {
            self.storage.simulation_db = PathBuf::from(path);
        }
        if let Some(flag) = non_empty_env("DUST_PERSIST_LIVE") {
            self.storage.persist_live = parse_bool(&flag)
                .ok_or_else(|| anyhow!("DUST_PERSIST_LIVE must be true/false (or 1/0)"))?;
        }
        if let Some(backoff) = non_empty_env("DUST_BACKOFF_SECS") {
            let seconds: u64 = backoff.trim().parse().map_err(|_| {
                anyhow!("DUST_BACKOFF_SECS must be an integer number of seconds")
            })?;
            self.backoff = Duration::from_secs(seconds);
        }
        if let Some(dir) = non_empty_env("DUST_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.locator.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.pipeline.window == 0 {
            return Err(anyhow!("pipeline window must be greater than zero"));
        }
        if self.backoff > Duration::from_secs(MAX_BACKOFF_SECS) {
            return Err(anyhow!(
                "recovery backoff must be at most {}s, got {}s",
                MAX_BACKOFF_SECS,
                self.backoff.as_secs()
            ));
        }
        if self.storage.live_db == self.storage.simulation_db {
            return Err(anyhow!(
                "live_db and simulation_db must be different files (both are {})",
                self.storage.live_db.display()
            ));
        }
        if let Some(alert) = &self.alert {
            if !(0.0..=100.0).contains(&alert.threshold) {
                return Err(anyhow!(
                    "alert threshold must be within 0..=100, got {}",
                    alert.threshold
                ));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sections_override_defaults() -> Result<()> {
        let file: MonitorConfigFile = toml::from_str(
            r#"
            [source]
            url = "stub://yard"

            [pipeline]
            algorithm = "histogram"
            window = 10
            direction = "higher_is_dustier"

            [storage]
            persist_live = false

            [alert]
            threshold = 65.0
            on_command = "/opt/beacon/on"
            off_command = "/opt/beacon/off"
            "#,
        )?;
        let cfg = MonitorConfig::from_file(file);
        assert_eq!(cfg.source.locator, "stub://yard");
        assert_eq!(cfg.source.target_fps, DEFAULT_SOURCE_FPS);
        assert_eq!(cfg.pipeline.algorithm, Algorithm::Histogram);
        assert_eq!(cfg.pipeline.window, 10);
        assert_eq!(cfg.pipeline.direction, Some(Direction::HigherIsDustier));
        assert!(!cfg.storage.persist_live);
        assert_eq!(cfg.storage.live_db, PathBuf::from(DEFAULT_LIVE_DB));
        assert_eq!(cfg.alert.as_ref().map(|a| a.threshold), Some(65.0));
        cfg.validate()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.pipeline.window, 70);
        assert_eq!(cfg.backoff, Duration::from_secs(3));
        assert!(cfg.alert.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_shared_store_and_zero_window() {
        let mut cfg = MonitorConfig::default();
        cfg.storage.simulation_db = cfg.storage.live_db.clone();
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.pipeline.window = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_backoff_longer_than_a_day() {
        let mut cfg = MonitorConfig::default();
        cfg.backoff = Duration::from_secs(MAX_BACKOFF_SECS);
        assert!(cfg.validate().is_ok());
        cfg.backoff = Duration::from_secs(u64::MAX);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<MonitorConfigFile>("[rtsp]\nurl = \"x\"").is_err());
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

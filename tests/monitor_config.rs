use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use dust_monitor::config::MonitorConfig;
use dust_monitor::{Algorithm, Direction};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DUST_CONFIG",
        "DUST_SOURCE_URL",
        "DUST_CALIBRATION_PATH",
        "DUST_ALGORITHM",
        "DUST_WINDOW",
        "DUST_LIVE_DB",
        "DUST_SIMULATION_DB",
        "DUST_PERSIST_LIVE",
        "DUST_BACKOFF_SECS",
        "DUST_SNAPSHOT_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [source]
        url = "rtsp://yard-camera/stream"
        target_fps = 5

        [calibration]
        path = "/var/lib/dust/params.json"

        [pipeline]
        algorithm = "histogram"
        window = 35
        direction = "higher_is_clearer"

        [storage]
        live_db = "/var/lib/dust/live.db"
        simulation_db = "/var/lib/dust/sim.db"

        [recovery]
        backoff_secs = 10
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("DUST_CONFIG", file.path());
    std::env::set_var("DUST_ALGORITHM", "contrast");
    std::env::set_var("DUST_PERSIST_LIVE", "false");
    std::env::set_var("DUST_BACKOFF_SECS", "1");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.source.locator, "rtsp://yard-camera/stream");
    assert_eq!(cfg.source.target_fps, 5);
    assert_eq!(cfg.source.width, 640);
    assert_eq!(cfg.calibration_path.to_str(), Some("/var/lib/dust/params.json"));
    assert_eq!(cfg.pipeline.algorithm, Algorithm::Contrast);
    assert_eq!(cfg.pipeline.window, 35);
    assert_eq!(cfg.pipeline.direction, Some(Direction::HigherIsClearer));
    assert_eq!(cfg.storage.live_db.to_str(), Some("/var/lib/dust/live.db"));
    assert_eq!(cfg.storage.simulation_db.to_str(), Some("/var/lib/dust/sim.db"));
    assert!(!cfg.storage.persist_live);
    assert_eq!(cfg.backoff, Duration::from_secs(1));
    assert!(cfg.alert.is_none());

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");
    assert_eq!(cfg.source.locator, "rtsp://localhost:8554/mystream");
    assert_eq!(cfg.pipeline.algorithm, Algorithm::Contrast);
    assert_eq!(cfg.pipeline.window, 70);
    assert_eq!(cfg.storage.live_db.to_str(), Some("dust_data.db"));
    assert_eq!(cfg.storage.simulation_db.to_str(), Some("dust_data_simulation.db"));
    assert!(cfg.storage.persist_live);
    assert_eq!(cfg.backoff, Duration::from_secs(3));
    assert_eq!(cfg.snapshot_dir.to_str(), Some("save_image"));
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DUST_WINDOW", "0");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("DUST_ALGORITHM", "sharpness");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("DUST_BACKOFF_SECS", "18446744073709551615");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("DUST_LIVE_DB", "same.db");
    std::env::set_var("DUST_SIMULATION_DB", "same.db");
    assert!(MonitorConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DUST_CONFIG", "/nonexistent/dust.toml");
    assert!(MonitorConfig::load().is_err());
    clear_env();
}

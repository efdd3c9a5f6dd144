//! Dust Monitor
//!
//! Estimates airborne dust at a fixed outdoor site from a single camera. Each frame's
//! site region is reduced to a scalar clarity signal, smoothed over a tumbling window,
//! mapped onto a 0..=100 severity scale against a calibrated range and appended to a
//! local SQLite store.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (RTSP/file streams, V4L2 devices, synthetic `stub://`)
//! - `frame`: Validated RGB frames and the fixed site region of interest
//! - `calibration`: Calibration artifact, signal range and reference histogram
//! - `extract`: Contrast and histogram-correlation signals
//! - `smoothing`: Tumbling window and calibration moving average
//! - `severity`: Normalizer and timestamped readings
//! - `storage`: Live and simulation reading sinks
//! - `monitor`: Acquisition loop with unbounded recovery
//! - `replay`: Offline replay of recorded signals into the simulation store
//! - `control`, `snapshot`, `alert`: Operator commands and side outputs

pub mod alert;
pub mod calibration;
pub mod config;
pub mod control;
pub mod error;
pub mod extract;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod replay;
pub mod severity;
pub mod smoothing;
pub mod snapshot;
pub mod storage;

pub use alert::{Actuator, AlertState, CommandActuator, ThresholdAlert};
pub use calibration::{CalibrationArtifact, CalibrationProfile, Calibrator, SignalRange};
pub use config::MonitorConfig;
pub use control::{CancellationToken, SnapshotTrigger};
pub use error::{DustError, PersistenceError};
pub use extract::{Algorithm, FeatureExtractor};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceStats, SyntheticSource, VideoConfig};
pub use monitor::{Monitor, MonitorSettings, MonitorState, MonitorStats};
pub use replay::{history_normalizer, replay, ReplayReport};
pub use severity::{Direction, Normalizer, ReadingClock, SeverityReading};
pub use smoothing::TumblingWindow;
pub use snapshot::SnapshotWriter;
pub use storage::{Destination, InMemoryReadingSink, ReadingSink, SqliteReadingSink};

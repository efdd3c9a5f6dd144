//! Error taxonomy for the dust pipeline.
//!
//! - `Configuration`: missing or malformed calibration/config artifacts. Fatal at startup.
//! - `DeviceUnavailable`: the video source could not be opened on the first attempt.
//!   Later device failures never surface here; the monitor recovers instead.
//! - `Persistence`: a reading could not be appended. The monitor logs and drops it.
//! - `Validation`: the replay harness did not observe new simulation rows.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DustError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("video source {locator} unavailable: {reason}")]
    DeviceUnavailable { locator: String, reason: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("replay validation failed: simulation rows before={before}, after={after}")]
    Validation { before: u64, after: u64 },
}

impl DustError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        DustError::Configuration(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite store {path}: {source}")]
    Sqlite {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

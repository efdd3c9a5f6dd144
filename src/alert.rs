//! Alert actuator control point.
//!
//! `ThresholdAlert` turns severity readings into on/off commands for an external
//! alert device (a beacon driven by vendor executables at the reference site). The
//! actuator is only commanded when the state changes.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::DustError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertState {
    On,
    Off,
}

/// An external alert device.
pub trait Actuator {
    fn set_alert(&mut self, state: AlertState) -> Result<()>;
}

/// Runs one executable to switch the alert on and another to switch it off.
#[derive(Debug)]
pub struct CommandActuator {
    on: PathBuf,
    off: PathBuf,
}

impl CommandActuator {
    /// Both executables must exist at startup.
    pub fn new(on: impl Into<PathBuf>, off: impl Into<PathBuf>) -> Result<Self, DustError> {
        let (on, off) = (on.into(), off.into());
        for path in [&on, &off] {
            if !path.is_file() {
                return Err(DustError::config(format!(
                    "alert executable {} does not exist",
                    path.display()
                )));
            }
        }
        Ok(Self { on, off })
    }

    fn run(path: &Path) -> Result<()> {
        let status = Command::new(path)
            .status()
            .with_context(|| format!("spawn alert command {}", path.display()))?;
        if !status.success() {
            return Err(anyhow!(
                "alert command {} exited with {}",
                path.display(),
                status
            ));
        }
        Ok(())
    }
}

impl Actuator for CommandActuator {
    fn set_alert(&mut self, state: AlertState) -> Result<()> {
        match state {
            AlertState::On => Self::run(&self.on),
            AlertState::Off => Self::run(&self.off),
        }
    }
}

/// Severity threshold policy driving an actuator.
pub struct ThresholdAlert {
    threshold: f64,
    actuator: Box<dyn Actuator>,
    state: Option<AlertState>,
}

impl ThresholdAlert {
    pub fn new(threshold: f64, actuator: Box<dyn Actuator>) -> Self {
        Self {
            threshold,
            actuator,
            state: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn state(&self) -> Option<AlertState> {
        self.state
    }

    /// On at or above the threshold, off below it.
    ///
    /// A failed command leaves the recorded state unchanged so the next reading retries.
    pub fn evaluate(&mut self, severity: f64) -> Result<Option<AlertState>> {
        let desired = if severity >= self.threshold {
            AlertState::On
        } else {
            AlertState::Off
        };
        if self.state == Some(desired) {
            return Ok(None);
        }
        self.actuator.set_alert(desired)?;
        self.state = Some(desired);
        Ok(Some(desired))
    }
}

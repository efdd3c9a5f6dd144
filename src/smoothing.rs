//! Tumbling-window smoothing of raw signals.

use crate::error::DustError;

/// Default live window (frames per emitted reading).
pub const DEFAULT_WINDOW: usize = 70;

/// Window used when deriving a calibration range from historical signals.
pub const CALIBRATION_WINDOW: usize = 100;

/// Fixed-size tumbling window.
///
/// Buffers raw signals in arrival order and emits their arithmetic mean once exactly
/// `size` values are held, then starts over empty. Emitted averages never overlap.
#[derive(Clone, Debug)]
pub struct TumblingWindow {
    size: usize,
    buffer: Vec<f64>,
}

impl TumblingWindow {
    pub fn new(size: usize) -> Result<Self, DustError> {
        if size == 0 {
            return Err(DustError::config("smoothing window must be at least 1"));
        }
        Ok(Self {
            size,
            buffer: Vec::with_capacity(size),
        })
    }

    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.buffer.push(value);
        if self.buffer.len() < self.size {
            return None;
        }
        let mean = self.buffer.iter().sum::<f64>() / self.size as f64;
        self.buffer.clear();
        Some(mean)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of values waiting for the window to fill.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially filled window.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Moving average over every full window of `window` values ("valid" convolution).
///
/// Returns an empty vector when `values` is shorter than `window` or `window` is 0.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out.push(sum / window as f64);
    }
    out
}

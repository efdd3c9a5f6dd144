//! Calibration store.
//!
//! A calibration artifact is captured once against a clean scene and holds:
//! - the historical raw contrast signals, and
//! - the reference 256-bin intensity histogram.
//!
//! `CalibrationProfile::load` validates the artifact and derives the signal range from
//! a moving average (window `CALIBRATION_WINDOW`) over the history. The profile is
//! immutable and shared read-only by the extractor and normalizer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::DustError;
use crate::extract::{contrast_variance, normalized_histogram, HISTOGRAM_BINS};
use crate::ingest::FrameSource;
use crate::smoothing::{moving_average, CALIBRATION_WINDOW};

const HISTOGRAM_SUM_TOLERANCE: f64 = 1e-3;

/// Calibration frames captured per second of recording.
pub const DEFAULT_CALIBRATION_FPS: u32 = 7;
/// Seconds of clean-scene recording.
pub const DEFAULT_CALIBRATION_SECS: u32 = 20;

/// On-disk calibration artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub signal_history: Vec<f64>,
    pub reference_histogram: Vec<f64>,
}

impl CalibrationArtifact {
    pub fn read(path: &Path) -> Result<Self, DustError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DustError::config(format!(
                "failed to read calibration artifact {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            DustError::config(format!(
                "invalid calibration artifact {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("write calibration artifact {}", path.display()))?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignalRange {
    pub min: f64,
    pub max: f64,
}

impl SignalRange {
    pub fn span(&self) -> f64 {
        (self.max - self.min).abs()
    }
}

/// Baseline statistics used to scale live signals. Immutable after load.
#[derive(Clone, Debug)]
pub struct CalibrationProfile {
    signal_range: SignalRange,
    reference_histogram: Arc<[f64]>,
    signal_history: Arc<[f64]>,
}

impl CalibrationProfile {
    /// Load and validate a calibration artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DustError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DustError::config(format!(
                "calibration artifact {} does not exist",
                path.display()
            )));
        }
        let artifact = CalibrationArtifact::read(path)?;
        let profile = Self::from_artifact(artifact)?;
        log::info!(
            "calibration loaded from {}: range [{:.4}, {:.4}] over {} samples",
            path.display(),
            profile.signal_range.min,
            profile.signal_range.max,
            profile.signal_history.len()
        );
        Ok(profile)
    }

    pub fn from_artifact(artifact: CalibrationArtifact) -> Result<Self, DustError> {
        validate_histogram(&artifact.reference_histogram)?;

        if artifact.signal_history.iter().any(|v| !v.is_finite()) {
            return Err(DustError::config(
                "calibration signal history contains non-finite values",
            ));
        }
        let smoothed = moving_average(&artifact.signal_history, CALIBRATION_WINDOW);
        if smoothed.is_empty() {
            return Err(DustError::config(format!(
                "calibration signal history has {} samples, need at least {}",
                artifact.signal_history.len(),
                CALIBRATION_WINDOW
            )));
        }
        let min = smoothed.iter().copied().fold(f64::INFINITY, f64::min);
        let max = smoothed.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            signal_range: SignalRange { min, max },
            reference_histogram: artifact.reference_histogram.into(),
            signal_history: artifact.signal_history.into(),
        })
    }

    pub fn signal_range(&self) -> SignalRange {
        self.signal_range
    }

    pub fn reference_histogram(&self) -> &[f64] {
        &self.reference_histogram
    }

    /// Raw signals recorded at calibration time (default replay source).
    pub fn signal_history(&self) -> &[f64] {
        &self.signal_history
    }
}

fn validate_histogram(hist: &[f64]) -> Result<(), DustError> {
    if hist.len() != HISTOGRAM_BINS {
        return Err(DustError::config(format!(
            "reference histogram has {} bins, expected {}",
            hist.len(),
            HISTOGRAM_BINS
        )));
    }
    if hist.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(DustError::config(
            "reference histogram has negative or non-finite weights",
        ));
    }
    let sum: f64 = hist.iter().sum();
    if (sum - 1.0).abs() > HISTOGRAM_SUM_TOLERANCE {
        return Err(DustError::config(format!(
            "reference histogram is not normalized (sum={:.6})",
            sum
        )));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Calibrator: capture an artifact from a clean scene
// ----------------------------------------------------------------------------

/// Records a clean-scene baseline from an open frame source.
pub struct Calibrator {
    frames: usize,
}

impl Calibrator {
    pub fn new(fps: u32, seconds: u32) -> Self {
        Self {
            frames: (fps as usize) * (seconds as usize),
        }
    }

    /// Capture `fps * seconds` frames from a connected source.
    ///
    /// Each frame contributes one contrast signal to the history and its normalized
    /// histogram to the averaged reference histogram.
    pub fn capture(&self, source: &mut dyn FrameSource) -> Result<CalibrationArtifact> {
        if self.frames == 0 {
            anyhow::bail!("calibration needs at least one frame");
        }
        let mut signal_history = Vec::with_capacity(self.frames);
        let mut hist_sum = vec![0.0f64; HISTOGRAM_BINS];

        for i in 0..self.frames {
            let frame = source
                .next_frame()
                .with_context(|| format!("capture calibration frame {}", i + 1))?;
            let roi = frame.region_of_interest();
            signal_history.push(contrast_variance(&roi));
            for (acc, w) in hist_sum.iter_mut().zip(normalized_histogram(&roi)) {
                *acc += w;
            }
            if (i + 1) % 20 == 0 {
                log::info!("calibration: {}/{} frames", i + 1, self.frames);
            }
        }

        let n = self.frames as f64;
        let reference_histogram = hist_sum.into_iter().map(|w| w / n).collect();
        Ok(CalibrationArtifact {
            signal_history,
            reference_histogram,
        })
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_FPS, DEFAULT_CALIBRATION_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_histogram() -> Vec<f64> {
        vec![1.0 / HISTOGRAM_BINS as f64; HISTOGRAM_BINS]
    }

    #[test]
    fn range_comes_from_smoothed_history() {
        // 100 samples of 1.0 followed by 100 samples of 3.0: smoothed min 1.0, max 3.0.
        let mut history = vec![1.0; 100];
        history.extend(vec![3.0; 100]);
        let profile = CalibrationProfile::from_artifact(CalibrationArtifact {
            signal_history: history,
            reference_histogram: flat_histogram(),
        })
        .unwrap();
        let range = profile.signal_range();
        assert!((range.min - 1.0).abs() < 1e-9);
        assert!((range.max - 3.0).abs() < 1e-9);
    }

    #[test]
    fn short_history_is_a_configuration_error() {
        let err = CalibrationProfile::from_artifact(CalibrationArtifact {
            signal_history: vec![1.0; 99],
            reference_histogram: flat_histogram(),
        })
        .unwrap_err();
        assert!(matches!(err, DustError::Configuration(_)));
    }

    #[test]
    fn histogram_shape_is_validated() {
        for hist in [
            vec![1.0 / 255.0; 255],
            vec![0.5; HISTOGRAM_BINS],
            {
                let mut h = flat_histogram();
                h[0] = -h[0];
                h
            },
        ] {
            let err = CalibrationProfile::from_artifact(CalibrationArtifact {
                signal_history: vec![1.0; 200],
                reference_histogram: hist,
            })
            .unwrap_err();
            assert!(matches!(err, DustError::Configuration(_)));
        }
    }

    #[test]
    fn missing_artifact_is_a_configuration_error() {
        let err = CalibrationProfile::load("/nonexistent/params.json").unwrap_err();
        assert!(matches!(err, DustError::Configuration(_)));
    }
}

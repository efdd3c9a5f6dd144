//! Per-frame feature extraction.
//!
//! Two algorithms score the site region of interest:
//! - `Contrast`: variance of the Laplacian of the brightened intensity plane. Dust
//!   haze blurs edges, so the variance falls as obstruction rises.
//! - `Histogram`: correlation of the intensity histogram with the clean-scene
//!   reference histogram. Haze shifts the distribution away from the baseline.
//!
//! Extraction never fails on a `Frame`; frames are validated when ingested.

use image::GrayImage;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::calibration::CalibrationProfile;
use crate::frame::Frame;

pub const HISTOGRAM_BINS: usize = 256;

/// Brightness lift applied before the Laplacian.
pub const CONTRAST_BRIGHTNESS_OFFSET: u8 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Contrast,
    Histogram,
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contrast" => Ok(Algorithm::Contrast),
            "histogram" | "hist" => Ok(Algorithm::Histogram),
            other => Err(format!("unknown algorithm {:?}", other)),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Contrast => f.write_str("contrast"),
            Algorithm::Histogram => f.write_str("histogram"),
        }
    }
}

/// Closed set of dust-signal extractors.
#[derive(Clone, Debug)]
pub enum FeatureExtractor {
    Contrast { brightness_offset: u8 },
    Histogram { reference: Arc<[f64]> },
}

impl FeatureExtractor {
    pub fn new(algorithm: Algorithm, profile: &CalibrationProfile) -> Self {
        match algorithm {
            Algorithm::Contrast => FeatureExtractor::Contrast {
                brightness_offset: CONTRAST_BRIGHTNESS_OFFSET,
            },
            Algorithm::Histogram => FeatureExtractor::Histogram {
                reference: profile.reference_histogram().into(),
            },
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            FeatureExtractor::Contrast { .. } => Algorithm::Contrast,
            FeatureExtractor::Histogram { .. } => Algorithm::Histogram,
        }
    }

    /// Score one frame.
    pub fn extract(&self, frame: &Frame) -> f64 {
        self.extract_region(&frame.region_of_interest())
    }

    /// Score an already-cropped intensity plane.
    pub fn extract_region(&self, roi: &GrayImage) -> f64 {
        match self {
            FeatureExtractor::Contrast { brightness_offset } => {
                contrast_variance_with_offset(roi, *brightness_offset)
            }
            FeatureExtractor::Histogram { reference } => {
                histogram_correlation(&normalized_histogram(roi), reference)
            }
        }
    }
}

/// Laplacian variance with the default brightness offset.
pub fn contrast_variance(roi: &GrayImage) -> f64 {
    contrast_variance_with_offset(roi, CONTRAST_BRIGHTNESS_OFFSET)
}

fn contrast_variance_with_offset(roi: &GrayImage, offset: u8) -> f64 {
    let (w, h) = (roi.width() as usize, roi.height() as usize);
    if w == 0 || h == 0 {
        return 0.0;
    }
    let lifted: Vec<f64> = roi
        .as_raw()
        .iter()
        .map(|&p| p.saturating_add(offset) as f64)
        .collect();
    let at = |x: isize, y: isize| lifted[reflect101(y, h) * w + reflect101(x, w)];

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..h as isize {
        for x in 0..w as isize {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Border reflection without repeating the edge pixel (`gfedcb|abcdefgh|gfedcba`).
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= n {
        i = 2 * n - 2 - i;
    }
    i as usize
}

/// 256-bin intensity histogram normalized to sum 1.0.
pub fn normalized_histogram(roi: &GrayImage) -> Vec<f64> {
    let mut counts = vec![0u64; HISTOGRAM_BINS];
    for p in roi.as_raw() {
        counts[*p as usize] += 1;
    }
    let total = roi.as_raw().len() as f64;
    if total == 0.0 {
        return vec![0.0; HISTOGRAM_BINS];
    }
    counts.into_iter().map(|c| c as f64 / total).collect()
}

/// Pearson correlation between two histograms.
///
/// Returns 1.0 when either histogram has zero variance.
pub fn histogram_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 1.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let (mut num, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let da = x - mean_a;
        let db = y - mean_b;
        num += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom > f64::EPSILON {
        num / denom
    } else {
        1.0
    }
}

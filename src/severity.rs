//! Severity scale: smoothed signal -> clamped 0..=100 reading.

use chrono::{DateTime, Local};
use serde::Deserialize;
use std::str::FromStr;

use crate::calibration::{CalibrationProfile, SignalRange};
use crate::extract::Algorithm;

pub const SEVERITY_MIN: f64 = 0.0;
pub const SEVERITY_MAX: f64 = 100.0;

/// Timestamp format shared by every persisted row (second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed correlation range used by the histogram algorithm.
pub const CORRELATION_RANGE: SignalRange = SignalRange { min: 0.0, max: 1.0 };

/// Which way the raw feature moves as dust increases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Larger raw values mean a clearer scene: severity = scale * (max - signal).
    HigherIsClearer,
    /// Larger raw values mean more dust: severity = scale * (signal - min).
    HigherIsDustier,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "higher_is_clearer" => Ok(Direction::HigherIsClearer),
            "higher_is_dustier" => Ok(Direction::HigherIsDustier),
            other => Err(format!("unknown severity direction {:?}", other)),
        }
    }
}

/// Maps smoothed signals onto the 0..=100 severity scale.
#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    range: SignalRange,
    direction: Direction,
}

impl Normalizer {
    pub fn new(range: SignalRange, direction: Direction) -> Self {
        if !(SEVERITY_MAX / range.span()).is_finite() {
            log::warn!(
                "calibration range [{}, {}] is degenerate; every reading will be {}",
                range.min,
                range.max,
                SEVERITY_MIN
            );
        }
        Self { range, direction }
    }

    /// Range and direction for `algorithm`.
    ///
    /// Contrast uses the calibrated range; histogram correlation is bounded to [0, 1].
    /// Both default to `HigherIsClearer` unless `direction` overrides it.
    pub fn for_algorithm(
        algorithm: Algorithm,
        profile: &CalibrationProfile,
        direction: Option<Direction>,
    ) -> Self {
        let range = match algorithm {
            Algorithm::Contrast => profile.signal_range(),
            Algorithm::Histogram => CORRELATION_RANGE,
        };
        Self::new(range, direction.unwrap_or(Direction::HigherIsClearer))
    }

    pub fn range(&self) -> SignalRange {
        self.range
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Scale `signal` into [0, 100].
    ///
    /// A degenerate range (zero or subnormal span) maps everything to 0; a non-finite
    /// signal maps to 100.
    pub fn normalize(&self, signal: f64) -> f64 {
        if !signal.is_finite() {
            return SEVERITY_MAX;
        }
        let scale = SEVERITY_MAX / self.range.span();
        if !scale.is_finite() {
            return SEVERITY_MIN;
        }
        let raw = match self.direction {
            Direction::HigherIsClearer => scale * (self.range.max - signal),
            Direction::HigherIsDustier => scale * (signal - self.range.min),
        };
        raw.clamp(SEVERITY_MIN, SEVERITY_MAX)
    }

    /// Normalize and stamp with the current wall-clock time.
    pub fn reading(&self, signal: f64) -> SeverityReading {
        SeverityReading::new(Local::now(), self.normalize(signal))
    }
}

/// A timestamped severity value. Immutable once created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeverityReading {
    timestamp: DateTime<Local>,
    value: f64,
}

impl SeverityReading {
    /// Build a reading; the value is clamped to [0, 100] and NaN becomes 100.
    pub fn new(timestamp: DateTime<Local>, value: f64) -> Self {
        let value = if value.is_nan() {
            SEVERITY_MAX
        } else {
            value.clamp(SEVERITY_MIN, SEVERITY_MAX)
        };
        Self { timestamp, value }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp_label(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Hands out non-decreasing timestamps for one destination.
#[derive(Clone, Debug, Default)]
pub struct ReadingClock {
    last: Option<DateTime<Local>>,
}

impl ReadingClock {
    /// `now`, or the previous timestamp if the wall clock stepped back.
    pub fn stamp(&mut self, now: DateTime<Local>) -> DateTime<Local> {
        let timestamp = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last = Some(timestamp);
        timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site_normalizer() -> Normalizer {
        Normalizer::new(SignalRange { min: 0.2, max: 0.9 }, Direction::HigherIsClearer)
    }

    #[test]
    fn calibrated_example_scenario() {
        let n = site_normalizer();
        assert_eq!(n.normalize(0.2), 100.0);
        assert_eq!(n.normalize(0.9), 0.0);
        assert!((n.normalize(0.55) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn output_is_always_clamped() {
        let n = site_normalizer();
        for signal in [-1e9, -3.0, 0.0, 0.1, 0.5, 1.0, 7.5, 1e12, f64::INFINITY, f64::NAN] {
            let v = n.normalize(signal);
            assert!((0.0..=100.0).contains(&v), "{} -> {}", signal, v);
        }
    }

    #[test]
    fn clearer_direction_is_monotonic_non_increasing() {
        let n = site_normalizer();
        let mut prev = f64::INFINITY;
        for i in 0..=200 {
            let signal = -0.5 + i as f64 * 0.01;
            let v = n.normalize(signal);
            assert!(v <= prev);
            prev = v;
        }
    }

    #[test]
    fn dustier_direction_inverts() {
        let n = Normalizer::new(SignalRange { min: 0.0, max: 1.0 }, Direction::HigherIsDustier);
        assert_eq!(n.normalize(0.0), 0.0);
        assert_eq!(n.normalize(1.0), 100.0);
    }

    #[test]
    fn degenerate_range_maps_to_zero() {
        let n = Normalizer::new(SignalRange { min: 0.4, max: 0.4 }, Direction::HigherIsClearer);
        assert_eq!(n.normalize(0.0), 0.0);
        assert_eq!(n.normalize(0.4), 0.0);
        assert_eq!(n.normalize(9.0), 0.0);
    }

    #[test]
    fn subnormal_span_is_degenerate() {
        let n = Normalizer::new(SignalRange { min: 0.0, max: 1e-320 }, Direction::HigherIsClearer);
        assert_eq!(n.normalize(1e-320), 0.0);
        assert_eq!(n.normalize(0.0), 0.0);
        let n = Normalizer::new(SignalRange { min: 0.0, max: 1e-320 }, Direction::HigherIsDustier);
        assert_eq!(n.normalize(5.0), 0.0);
    }

    #[test]
    fn clock_never_steps_back() {
        let mut clock = ReadingClock::default();
        let t0 = Local::now();
        let earlier = t0 - chrono::Duration::seconds(30);
        let later = t0 + chrono::Duration::seconds(5);

        assert_eq!(clock.stamp(t0), t0);
        assert_eq!(clock.stamp(earlier), t0);
        assert_eq!(clock.stamp(t0), t0);
        assert_eq!(clock.stamp(later), later);
        assert_eq!(clock.stamp(earlier), later);
    }

    #[test]
    fn reading_label_has_second_precision() {
        let ts = Local::now();
        let reading = SeverityReading::new(ts, 140.0);
        assert_eq!(reading.value(), 100.0);
        assert_eq!(reading.timestamp_label().len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn direction_parses() {
        assert_eq!(
            "higher-is-dustier".parse::<Direction>().unwrap(),
            Direction::HigherIsDustier
        );
        assert!("sideways".parse::<Direction>().is_err());
    }
}

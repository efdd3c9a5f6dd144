//! Replay harness.
//!
//! Feeds recorded raw signals through the live smoothing/normalization path into the
//! simulation store, then checks that the store actually grew. Each window starts at a
//! random offset into the recording so consecutive readings vary the way live ones do.

use chrono::Local;
use rand::Rng;

use crate::calibration::CalibrationProfile;
use crate::error::DustError;
use crate::extract::Algorithm;
use crate::severity::{Direction, Normalizer, ReadingClock, SeverityReading};
use crate::smoothing::TumblingWindow;
use crate::storage::{Destination, ReadingSink};

#[derive(Clone, Debug, PartialEq)]
pub struct ReplayReport {
    pub samples_fed: usize,
    pub readings_persisted: u64,
    pub readings_dropped: u64,
    pub rows_before: u64,
    pub rows_after: u64,
}

/// Normalizer for replaying `profile`'s own signal history.
///
/// The history is always contrast signals, so it is scaled by the calibrated range
/// whatever algorithm the live pipeline is configured with.
pub fn history_normalizer(
    profile: &CalibrationProfile,
    direction: Option<Direction>,
) -> Normalizer {
    Normalizer::for_algorithm(Algorithm::Contrast, profile, direction)
}

/// Replay `passes` passes worth of samples (`passes * signals.len()`) through `window`.
///
/// Persists `passes * floor(L / w)` readings to `Destination::Simulation` and fails with
/// `DustError::Validation` unless the simulation row count strictly increased.
pub fn replay<K: ReadingSink + ?Sized, R: Rng + ?Sized>(
    signals: &[f64],
    window: &mut TumblingWindow,
    normalizer: &Normalizer,
    sink: &mut K,
    rng: &mut R,
    passes: usize,
) -> Result<ReplayReport, DustError> {
    let w = window.size();
    let rows_before = sink.row_count(Destination::Simulation)?;
    window.reset();

    let windows = if signals.len() < w {
        log::warn!(
            "recording has {} samples, shorter than the window of {}",
            signals.len(),
            w
        );
        0
    } else {
        passes * (signals.len() / w)
    };

    let mut report = ReplayReport {
        samples_fed: 0,
        readings_persisted: 0,
        readings_dropped: 0,
        rows_before,
        rows_after: rows_before,
    };
    let mut clock = ReadingClock::default();

    for _ in 0..windows {
        let start = rng.gen_range(0..=signals.len() - w);
        for &signal in &signals[start..start + w] {
            report.samples_fed += 1;
            let Some(smoothed) = window.push(signal) else {
                continue;
            };
            let timestamp = clock.stamp(Local::now());
            let reading = SeverityReading::new(timestamp, normalizer.normalize(smoothed));
            match sink.append(&reading, Destination::Simulation) {
                Ok(()) => report.readings_persisted += 1,
                Err(err) => {
                    report.readings_dropped += 1;
                    log::warn!("simulation reading dropped: {}", err);
                }
            }
        }
    }

    report.rows_after = sink.row_count(Destination::Simulation)?;
    if report.rows_after <= report.rows_before {
        return Err(DustError::Validation {
            before: report.rows_before,
            after: report.rows_after,
        });
    }
    log::info!(
        "replay stored {} simulation readings ({} -> {} rows)",
        report.readings_persisted,
        report.rows_before,
        report.rows_after
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationArtifact, SignalRange};
    use crate::extract::HISTOGRAM_BINS;
    use crate::storage::InMemoryReadingSink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn normalizer() -> Normalizer {
        Normalizer::new(SignalRange { min: 0.0, max: 10.0 }, Direction::HigherIsClearer)
    }

    #[test]
    fn persists_floor_l_over_w_per_pass() {
        let signals: Vec<f64> = (0..103).map(|i| (i % 10) as f64).collect();
        for (w, passes) in [(10, 1), (7, 1), (10, 3), (103, 2)] {
            let mut sink = InMemoryReadingSink::default();
            let mut window = TumblingWindow::new(w).unwrap();
            let mut rng = StdRng::seed_from_u64(42);
            let report =
                replay(&signals, &mut window, &normalizer(), &mut sink, &mut rng, passes).unwrap();
            let expected = (passes * (signals.len() / w)) as u64;
            assert_eq!(report.readings_persisted, expected);
            assert_eq!(sink.rows(Destination::Simulation).len() as u64, expected);
            assert!(sink.rows(Destination::Live).is_empty());
            assert_eq!(window.pending(), 0);
        }
    }

    #[test]
    fn readings_stay_on_the_severity_scale() {
        let signals: Vec<f64> = (0..500).map(|i| (i as f64 * 0.37).sin() * 20.0).collect();
        let mut sink = InMemoryReadingSink::default();
        let mut window = TumblingWindow::new(25).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        replay(&signals, &mut window, &normalizer(), &mut sink, &mut rng, 1).unwrap();
        assert!(sink
            .rows(Destination::Simulation)
            .iter()
            .all(|r| (0.0..=100.0).contains(&r.value())));
    }

    #[test]
    fn history_replay_spans_the_severity_scale() {
        let profile = CalibrationProfile::from_artifact(CalibrationArtifact {
            signal_history: (0..200).map(|i| 40.0 + i as f64 * 0.5).collect(),
            reference_histogram: vec![1.0 / HISTOGRAM_BINS as f64; HISTOGRAM_BINS],
        })
        .unwrap();
        let normalizer = history_normalizer(&profile, None);
        assert_eq!(normalizer.range(), profile.signal_range());
        assert_eq!(normalizer.direction(), Direction::HigherIsClearer);

        let mut sink = InMemoryReadingSink::default();
        let mut window = TumblingWindow::new(10).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        replay(
            profile.signal_history(),
            &mut window,
            &normalizer,
            &mut sink,
            &mut rng,
            4,
        )
        .unwrap();

        let values: Vec<f64> = sink
            .rows(Destination::Simulation)
            .iter()
            .map(|r| r.value())
            .collect();
        assert_eq!(values.len(), 80);
        assert!(values.iter().any(|&v| v > 0.0));
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(max - min > 10.0);
    }

    #[test]
    fn short_recording_fails_validation() {
        let mut sink = InMemoryReadingSink::default();
        let mut window = TumblingWindow::new(70).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let err = replay(&[1.0; 69], &mut window, &normalizer(), &mut sink, &mut rng, 1)
            .unwrap_err();
        assert!(matches!(err, DustError::Validation { before: 0, after: 0 }));
    }
}

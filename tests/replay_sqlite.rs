use rand::rngs::StdRng;
use rand::SeedableRng;

use dust_monitor::calibration::SignalRange;
use dust_monitor::{
    replay, Destination, Direction, DustError, Normalizer, ReadingSink, SqliteReadingSink,
    TumblingWindow,
};

fn normalizer() -> Normalizer {
    Normalizer::new(
        SignalRange {
            min: 200.0,
            max: 900.0,
        },
        Direction::HigherIsClearer,
    )
}

#[test]
fn replay_appends_to_simulation_store_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut sink = SqliteReadingSink::open(
        dir.path().join("dust_data.db"),
        dir.path().join("dust_data_simulation.db"),
    )?;
    let signals: Vec<f64> = (0..700).map(|i| 200.0 + i as f64).collect();
    let mut window = TumblingWindow::new(70)?;
    let mut rng = StdRng::seed_from_u64(7);

    let first = replay(&signals, &mut window, &normalizer(), &mut sink, &mut rng, 1)?;
    assert_eq!(first.rows_before, 0);
    assert_eq!(first.rows_after, 10);
    assert_eq!(first.readings_persisted, 10);

    // A second run grows the store again.
    let second = replay(&signals, &mut window, &normalizer(), &mut sink, &mut rng, 2)?;
    assert_eq!(second.rows_before, 10);
    assert_eq!(second.rows_after, 30);

    assert_eq!(sink.row_count(Destination::Live)?, 0);
    assert_eq!(sink.row_count(Destination::Simulation)?, 30);
    Ok(())
}

#[test]
fn replay_without_new_rows_is_a_validation_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut sink = SqliteReadingSink::open(
        dir.path().join("live.db"),
        dir.path().join("sim.db"),
    )?;
    let mut window = TumblingWindow::new(70)?;
    let mut rng = StdRng::seed_from_u64(7);

    let err = replay(&[500.0; 30], &mut window, &normalizer(), &mut sink, &mut rng, 3)
        .unwrap_err();
    assert!(matches!(err, DustError::Validation { before: 0, after: 0 }));
    Ok(())
}

#[test]
fn live_and_simulation_paths_must_differ() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dust_data.db");
    let err = SqliteReadingSink::open(&path, &path).unwrap_err();
    assert!(matches!(err, DustError::Configuration(_)));
}

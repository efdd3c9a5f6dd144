//! Persistence sink for severity readings.
//!
//! Rows are `(Timestamp, Dust_Level)` in table `dust_data`, the shape the dashboard
//! and CSV importer read. Live and simulation readings go to separate database files.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::error::{DustError, PersistenceError};
use crate::severity::SeverityReading;

/// Which append-only store a reading goes to. The two never share rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    Live,
    Simulation,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Live => f.write_str("live"),
            Destination::Simulation => f.write_str("simulation"),
        }
    }
}

/// Append-only sink for severity readings.
pub trait ReadingSink {
    fn append(
        &mut self,
        reading: &SeverityReading,
        destination: Destination,
    ) -> Result<(), PersistenceError>;

    /// Row count for one destination. Used by replay validation only.
    fn row_count(&self, destination: Destination) -> Result<u64, PersistenceError>;
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

/// Two SQLite files, one per destination.
///
/// A failed write drops that destination's connection; the next append reopens it.
#[derive(Debug)]
pub struct SqliteReadingSink {
    live: SqliteTable,
    simulation: SqliteTable,
}

#[derive(Debug)]
struct SqliteTable {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteReadingSink {
    pub fn open(
        live_path: impl AsRef<Path>,
        simulation_path: impl AsRef<Path>,
    ) -> Result<Self, DustError> {
        let live_path = live_path.as_ref().to_path_buf();
        let simulation_path = simulation_path.as_ref().to_path_buf();
        if live_path == simulation_path {
            return Err(DustError::config(format!(
                "live and simulation stores must be separate files (both are {})",
                live_path.display()
            )));
        }
        let mut live = SqliteTable::new(live_path);
        let mut simulation = SqliteTable::new(simulation_path);
        live.connection()?;
        simulation.connection()?;
        Ok(Self { live, simulation })
    }

    pub fn path(&self, destination: Destination) -> &Path {
        &self.table(destination).path
    }

    fn table(&self, destination: Destination) -> &SqliteTable {
        match destination {
            Destination::Live => &self.live,
            Destination::Simulation => &self.simulation,
        }
    }

    fn table_mut(&mut self, destination: Destination) -> &mut SqliteTable {
        match destination {
            Destination::Live => &mut self.live,
            Destination::Simulation => &mut self.simulation,
        }
    }
}

impl SqliteTable {
    fn new(path: PathBuf) -> Self {
        Self { path, conn: None }
    }

    fn sqlite_err(&self, source: rusqlite::Error) -> PersistenceError {
        PersistenceError::Sqlite {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn connection(&mut self) -> Result<&Connection, PersistenceError> {
        if self.conn.is_none() {
            let conn = Connection::open(&self.path).map_err(|e| self.sqlite_err(e))?;
            ensure_schema(&conn).map_err(|e| self.sqlite_err(e))?;
            self.conn = Some(conn);
        }
        self.conn
            .as_ref()
            .ok_or_else(|| PersistenceError::Unavailable(self.path.display().to_string()))
    }

    fn insert(&mut self, reading: &SeverityReading) -> Result<(), PersistenceError> {
        let conn = self.connection()?;
        let outcome = conn.execute(
            r#"INSERT INTO dust_data("Timestamp", "Dust_Level") VALUES (?1, ?2)"#,
            params![reading.timestamp_label(), reading.value()],
        );
        if let Err(e) = outcome {
            self.conn = None;
            return Err(self.sqlite_err(e));
        }
        Ok(())
    }

    /// Uses a fresh connection when the cached one was dropped after a failed write.
    fn count(&self) -> Result<u64, PersistenceError> {
        let reopened;
        let conn = match &self.conn {
            Some(conn) => conn,
            None => {
                let conn = Connection::open(&self.path).map_err(|e| self.sqlite_err(e))?;
                ensure_schema(&conn).map_err(|e| self.sqlite_err(e))?;
                reopened = conn;
                &reopened
            }
        };
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM dust_data", [], |row| row.get(0))
            .map_err(|e| self.sqlite_err(e))?;
        Ok(n.max(0) as u64)
    }
}

fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS dust_data (
          "Timestamp" TEXT NOT NULL,
          "Dust_Level" REAL NOT NULL
        );
        "#,
    )
}

impl ReadingSink for SqliteReadingSink {
    fn append(
        &mut self,
        reading: &SeverityReading,
        destination: Destination,
    ) -> Result<(), PersistenceError> {
        self.table_mut(destination).insert(reading)
    }

    fn row_count(&self, destination: Destination) -> Result<u64, PersistenceError> {
        self.table(destination).count()
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryReadingSink {
    live: Vec<SeverityReading>,
    simulation: Vec<SeverityReading>,
}

impl InMemoryReadingSink {
    pub fn rows(&self, destination: Destination) -> &[SeverityReading] {
        match destination {
            Destination::Live => &self.live,
            Destination::Simulation => &self.simulation,
        }
    }
}

impl ReadingSink for InMemoryReadingSink {
    fn append(
        &mut self,
        reading: &SeverityReading,
        destination: Destination,
    ) -> Result<(), PersistenceError> {
        match destination {
            Destination::Live => self.live.push(*reading),
            Destination::Simulation => self.simulation.push(*reading),
        }
        Ok(())
    }

    fn row_count(&self, destination: Destination) -> Result<u64, PersistenceError> {
        Ok(self.rows(destination).len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn reading(value: f64) -> SeverityReading {
        SeverityReading::new(Local::now(), value)
    }

    #[test]
    fn sqlite_destinations_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live.db");
        let sim = dir.path().join("sim.db");
        let mut sink = SqliteReadingSink::open(&live, &sim).unwrap();

        sink.append(&reading(10.0), Destination::Live).unwrap();
        sink.append(&reading(20.0), Destination::Simulation).unwrap();
        sink.append(&reading(30.0), Destination::Simulation).unwrap();

        assert_eq!(sink.row_count(Destination::Live).unwrap(), 1);
        assert_eq!(sink.row_count(Destination::Simulation).unwrap(), 2);

        let conn = Connection::open(&live).unwrap();
        let value: f64 = conn
            .query_row(r#"SELECT "Dust_Level" FROM dust_data"#, [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 10.0);
    }

    #[test]
    fn sqlite_preserves_call_order() {
        let dir = tempfile::tempdir().unwrap();
        let sim = dir.path().join("sim.db");
        let mut sink = SqliteReadingSink::open(dir.path().join("live.db"), &sim).unwrap();
        for v in [5.0, 1.0, 3.0] {
            sink.append(&reading(v), Destination::Simulation).unwrap();
        }

        let conn = Connection::open(&sim).unwrap();
        let mut stmt = conn
            .prepare(r#"SELECT "Dust_Level", "Timestamp" FROM dust_data ORDER BY rowid ASC"#)
            .unwrap();
        let rows: Vec<(f64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        let values: Vec<f64> = rows.iter().map(|(v, _)| *v).collect();
        assert_eq!(values, vec![5.0, 1.0, 3.0]);
        assert!(rows.iter().all(|(_, ts)| ts.len() == 19));
    }

    #[test]
    fn store_recovers_after_a_failed_insert() {
        let dir = tempfile::tempdir().unwrap();
        let sim = dir.path().join("sim.db");
        let mut sink = SqliteReadingSink::open(dir.path().join("live.db"), &sim).unwrap();
        sink.append(&reading(1.0), Destination::Simulation).unwrap();

        let external = Connection::open(&sim).unwrap();
        external.execute_batch("DROP TABLE dust_data;").unwrap();
        assert!(sink.append(&reading(2.0), Destination::Simulation).is_err());

        external
            .execute_batch(r#"CREATE TABLE dust_data ("Timestamp" TEXT, "Dust_Level" REAL);"#)
            .unwrap();
        assert_eq!(sink.row_count(Destination::Simulation).unwrap(), 0);
        sink.append(&reading(3.0), Destination::Simulation).unwrap();
        assert_eq!(sink.row_count(Destination::Simulation).unwrap(), 1);
    }

    #[test]
    fn same_path_for_both_destinations_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dust.db");
        assert!(matches!(
            SqliteReadingSink::open(&path, &path),
            Err(DustError::Configuration(_))
        ));
    }

    #[test]
    fn in_memory_keeps_destinations_apart() {
        let mut sink = InMemoryReadingSink::default();
        sink.append(&reading(1.0), Destination::Live).unwrap();
        sink.append(&reading(2.0), Destination::Simulation).unwrap();
        assert_eq!(sink.rows(Destination::Live)[0].value(), 1.0);
        assert_eq!(sink.rows(Destination::Simulation)[0].value(), 2.0);
        assert_eq!(sink.row_count(Destination::Live).unwrap(), 1);
    }
}

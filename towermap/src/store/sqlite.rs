//! SQLite-backed store.
//!
//! Requires the `sqlite` feature. Timestamps are stored as RFC 3339 strings
//! in UTC so lexical comparison matches chronological order.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{QuotaStore, TowerStore, UpsertOutcome};
use crate::error::{Result, TowerError};
use crate::geo::BoundingBox;
use crate::model::{Observation, RadioType, TowerRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cell_towers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cell_id INTEGER NOT NULL,
    lac INTEGER NOT NULL,
    mcc INTEGER NOT NULL,
    mnc INTEGER NOT NULL,
    radio TEXT NOT NULL DEFAULT 'GSM',
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    range_m INTEGER,
    signal_avg INTEGER,
    samples INTEGER,
    operator TEXT,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CONSTRAINT uq_cell_identity UNIQUE (cell_id, lac, mcc, mnc, radio)
);
CREATE INDEX IF NOT EXISTS idx_lat_lon ON cell_towers (lat, lon);
CREATE TABLE IF NOT EXISTS api_usage (
    date TEXT PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0
);
";

const TOWER_COLUMNS: &str = "id, cell_id, lac, mcc, mnc, radio, lat, lon, range_m, signal_avg, \
                             samples, operator, source, created_at, updated_at";

/// SQLite implementation of [`TowerStore`] and [`QuotaStore`].
///
/// The connection is guarded by a `Mutex`, which serializes every statement.
/// Identity uniqueness is enforced by the schema. Upserts insert with
/// `ON CONFLICT DO NOTHING` and fall back to an update, so a second writer on
/// the same file updates instead of duplicating.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        add_operator_column(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TowerError::Store {
            reason: "sqlite connection lock poisoned".to_string(),
        })
    }
}

/// Databases created before operators were tracked lack the column.
fn add_operator_column(conn: &Connection) -> Result<()> {
    let has_operator = conn
        .prepare("PRAGMA table_info(cell_towers)")?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|name| name == "operator");
    if !has_operator {
        tracing::info!("Adding operator column to cell_towers");
        conn.execute("ALTER TABLE cell_towers ADD COLUMN operator TEXT", [])?;
    }
    Ok(())
}

fn to_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TowerRecord> {
    let radio: String = row.get(5)?;
    let radio = radio.parse::<RadioType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(TowerRecord {
        id: row.get::<_, i64>(0)? as u64,
        cell_id: row.get::<_, i64>(1)? as u64,
        lac: row.get(2)?,
        mcc: row.get(3)?,
        mnc: row.get(4)?,
        radio,
        lat: row.get(6)?,
        lon: row.get(7)?,
        range_m: row.get(8)?,
        signal_avg: row.get(9)?,
        samples: row.get(10)?,
        operator: row.get(11)?,
        source: row.get(12)?,
        created_at: parse_timestamp(13, row.get(13)?)?,
        updated_at: parse_timestamp(14, row.get(14)?)?,
    })
}

impl TowerStore for SqliteStore {
    fn find_in_box(&self, bbox: &BoundingBox) -> Result<Vec<TowerRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TOWER_COLUMNS} FROM cell_towers
             WHERE lat BETWEEN ?1 AND ?2 AND lon BETWEEN ?3 AND ?4
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(
            params![bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon],
            row_to_record,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn upsert(
        &self,
        obs: &Observation,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let conn = self.lock()?;
        let now = to_timestamp(now);

        // Rows are never deleted, so a key skipped by DO NOTHING is there to update
        let inserted: Option<i64> = conn
            .query_row(
                "INSERT INTO cell_towers
                     (cell_id, lac, mcc, mnc, radio, lat, lon, range_m, signal_avg, samples,
                      operator, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
                 ON CONFLICT (cell_id, lac, mcc, mnc, radio) DO NOTHING
                 RETURNING id",
                params![
                    obs.key.cell_id as i64,
                    obs.key.lac,
                    obs.key.mcc,
                    obs.key.mnc,
                    obs.key.radio.as_str(),
                    obs.lat,
                    obs.lon,
                    obs.range_m,
                    obs.signal_avg,
                    obs.samples,
                    obs.operator,
                    source,
                    now,
                ],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = inserted {
            return Ok(UpsertOutcome::Inserted(id as u64));
        }

        let id: i64 = conn.query_row(
            "UPDATE cell_towers SET
                 lat = ?6,
                 lon = ?7,
                 range_m = COALESCE(?8, range_m),
                 signal_avg = COALESCE(?9, signal_avg),
                 samples = COALESCE(?10, samples),
                 operator = COALESCE(?11, operator),
                 updated_at = ?12
             WHERE cell_id = ?1 AND lac = ?2 AND mcc = ?3 AND mnc = ?4 AND radio = ?5
             RETURNING id",
            params![
                obs.key.cell_id as i64,
                obs.key.lac,
                obs.key.mcc,
                obs.key.mnc,
                obs.key.radio.as_str(),
                obs.lat,
                obs.lon,
                obs.range_m,
                obs.signal_avg,
                obs.samples,
                obs.operator,
                now,
            ],
            |row| row.get(0),
        )?;
        Ok(UpsertOutcome::Updated(id as u64))
    }

    fn get(&self, id: u64) -> Result<Option<TowerRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {TOWER_COLUMNS} FROM cell_towers WHERE id = ?1"),
                params![id as i64],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cell_towers", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_by_radio(&self) -> Result<BTreeMap<RadioType, u64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT radio, COUNT(*) FROM cell_towers GROUP BY radio")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (radio, count) = row?;
            if let Ok(radio) = radio.parse::<RadioType>() {
                counts.insert(radio, count as u64);
            }
        }
        Ok(counts)
    }
}

impl QuotaStore for SqliteStore {
    fn calls_on(&self, date: NaiveDate) -> Result<u32> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO api_usage (date, count) VALUES (?1, 0)",
            params![date.to_string()],
        )?;
        let count: u32 = conn.query_row(
            "SELECT count FROM api_usage WHERE date = ?1",
            params![date.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn increment(&self, date: NaiveDate) -> Result<u32> {
        let conn = self.lock()?;
        let count: u32 = conn.query_row(
            "INSERT INTO api_usage (date, count) VALUES (?1, 1)
             ON CONFLICT (date) DO UPDATE SET count = count + 1
             RETURNING count",
            params![date.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn try_increment(&self, date: NaiveDate, limit: u32) -> Result<Option<u32>> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO api_usage (date, count) VALUES (?1, 0)",
            params![date.to_string()],
        )?;
        let count: Option<u32> = conn
            .query_row(
                "UPDATE api_usage SET count = count + 1
                 WHERE date = ?1 AND count < ?2
                 RETURNING count",
                params![date.to_string(), limit],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count)
    }
}

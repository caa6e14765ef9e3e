//! SQLite-backed repository for canonical weather records.
//!
//! [`WeatherStore`] owns the connection and the row mapping;
//! [`WeatherRepository`] is the cloneable async handle the rest of the
//! pipeline talks to. All access funnels through one mutex, which makes
//! the repository the single serialization point for concurrent ingest
//! calls: a batch commits whole or not at all, and the last committed
//! writer wins per key.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::StoreError;
use crate::types::{Candidate, Location, RecordKind, WeatherRecord};

/// SQLite UNIQUE treats NULLs as distinct values, which would let a
/// missing horizon slip past the key. Absent horizons are keyed as -1
/// instead and decoded back to `None`.
const NO_HORIZON: i64 = -1;

const RECORD_COLUMNS: &str = "city, country, latitude, longitude, kind, observed_at_ms, \
     horizon_secs, temperature, feels_like, humidity, pressure, wind_speed, \
     condition_code, condition, aqi, pollutants, ingested_at_ms";

const UPSERT_SQL: &str = r#"
    INSERT INTO weather_records
        (location_key, city, country, latitude, longitude, kind, observed_at_ms,
         horizon_secs, temperature, feels_like, humidity, pressure, wind_speed,
         condition_code, condition, aqi, pollutants, ingested_at_ms)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
    ON CONFLICT(location_key, kind, observed_at_ms, horizon_secs) DO UPDATE SET
        temperature = excluded.temperature,
        feels_like = excluded.feels_like,
        humidity = excluded.humidity,
        pressure = excluded.pressure,
        wind_speed = excluded.wind_speed,
        condition_code = excluded.condition_code,
        condition = excluded.condition,
        aqi = excluded.aqi,
        pollutants = excluded.pollutants,
        ingested_at_ms = excluded.ingested_at_ms
"#;

/// Blocking store over one SQLite connection.
pub struct WeatherStore {
    conn: Connection,
}

impl WeatherStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("failed to create storage directory: {e}"))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("failed to open database: {e}")))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("failed to open database: {e}")))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Bootstrap the table on an empty store. Only `IF NOT EXISTS`
    /// creation lives here; evolving an existing layout is an external
    /// migration concern.
    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather_records (
                location_key TEXT NOT NULL,
                city TEXT NOT NULL,
                country TEXT NOT NULL,
                latitude REAL,
                longitude REAL,
                kind TEXT NOT NULL CHECK (kind IN ('current', 'forecast', 'air_quality')),
                observed_at_ms INTEGER NOT NULL,
                horizon_secs INTEGER NOT NULL DEFAULT -1,
                temperature REAL,
                feels_like REAL,
                humidity INTEGER,
                pressure REAL,
                wind_speed REAL,
                condition_code INTEGER,
                condition TEXT,
                aqi INTEGER CHECK (aqi IS NULL OR aqi BETWEEN 1 AND 5),
                pollutants TEXT,
                ingested_at_ms INTEGER NOT NULL,
                PRIMARY KEY (location_key, kind, observed_at_ms, horizon_secs)
            );

            CREATE INDEX IF NOT EXISTS idx_weather_location_kind
                ON weather_records(location_key, kind, observed_at_ms);
            "#,
        )?;
        Ok(())
    }

    /// Write one batch atomically. On a key collision the existing row's
    /// measure fields and `ingested_at` are replaced; the key and the
    /// location columns stay untouched. Returns the number of rows
    /// written.
    pub fn upsert(&mut self, candidates: &[Candidate]) -> Result<usize, StoreError> {
        if candidates.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for candidate in candidates {
                let pollutants_json = candidate
                    .pollutants
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| {
                        StoreError::ConstraintViolation(format!("unencodable pollutant map: {e}"))
                    })?;

                written += stmt.execute(params![
                    candidate.location.storage_key(),
                    candidate.location.city.trim(),
                    candidate.location.country.trim().to_uppercase(),
                    candidate.location.latitude,
                    candidate.location.longitude,
                    candidate.kind.as_str(),
                    candidate.observed_at.timestamp_millis(),
                    candidate.horizon_secs.unwrap_or(NO_HORIZON),
                    candidate.temperature,
                    candidate.feels_like,
                    candidate.humidity,
                    candidate.pressure,
                    candidate.wind_speed,
                    candidate.condition_code,
                    candidate.condition,
                    candidate.aqi,
                    pollutants_json,
                    now.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Records for a location and kind, ascending by observed time. The
    /// optional range is half-open: `start <= observed_at < end`.
    pub fn query(
        &self,
        location: &Location,
        kind: RecordKind,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<WeatherRecord>, StoreError> {
        let sql = if range.is_some() {
            format!(
                "SELECT {RECORD_COLUMNS} FROM weather_records
                 WHERE location_key = ?1 AND kind = ?2
                   AND observed_at_ms >= ?3 AND observed_at_ms < ?4
                 ORDER BY observed_at_ms ASC"
            )
        } else {
            format!(
                "SELECT {RECORD_COLUMNS} FROM weather_records
                 WHERE location_key = ?1 AND kind = ?2
                 ORDER BY observed_at_ms ASC"
            )
        };

        let mut stmt = self.conn.prepare(&sql)?;

        let rows = if let Some((start, end)) = range {
            stmt.query_map(
                params![
                    location.storage_key(),
                    kind.as_str(),
                    start.timestamp_millis(),
                    end.timestamp_millis()
                ],
                Self::row_to_record,
            )?
        } else {
            stmt.query_map(
                params![location.storage_key(), kind.as_str()],
                Self::row_to_record,
            )?
        };

        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// The most recent record of a kind for a location, by observed time.
    pub fn latest(
        &self,
        location: &Location,
        kind: RecordKind,
    ) -> Result<Option<WeatherRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM weather_records
             WHERE location_key = ?1 AND kind = ?2
             ORDER BY observed_at_ms DESC LIMIT 1"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let mut rows = stmt.query(params![location.storage_key(), kind.as_str()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_record(row)?))
        } else {
            Ok(None)
        }
    }

    /// Total number of stored rows.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM weather_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<WeatherRecord> {
        let city: String = row.get(0)?;
        let country: String = row.get(1)?;
        let latitude: Option<f64> = row.get(2)?;
        let longitude: Option<f64> = row.get(3)?;

        let kind_str: String = row.get(4)?;
        let kind = RecordKind::parse_str(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown record kind: {kind_str}").into(),
            )
        })?;

        let observed_at_ms: i64 = row.get(5)?;
        let horizon_secs: i64 = row.get(6)?;
        let pollutants_json: Option<String> = row.get(15)?;
        let ingested_at_ms: i64 = row.get(16)?;

        Ok(WeatherRecord {
            location: Location {
                city,
                country,
                latitude,
                longitude,
            },
            kind,
            observed_at: DateTime::from_timestamp_millis(observed_at_ms).unwrap_or_default(),
            horizon_secs: (horizon_secs >= 0).then_some(horizon_secs),
            temperature: row.get(7)?,
            feels_like: row.get(8)?,
            humidity: row.get(9)?,
            pressure: row.get(10)?,
            wind_speed: row.get(11)?,
            condition_code: row.get(12)?,
            condition: row.get(13)?,
            aqi: row.get(14)?,
            pollutants: pollutants_json.and_then(|s| serde_json::from_str(&s).ok()),
            ingested_at: DateTime::from_timestamp_millis(ingested_at_ms).unwrap_or_default(),
        })
    }
}

/// Cloneable async handle over the store.
///
/// Blocking SQLite work runs on the blocking pool; the inner mutex
/// serializes every batch.
#[derive(Clone)]
pub struct WeatherRepository {
    store: Arc<Mutex<WeatherStore>>,
}

impl WeatherRepository {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self {
            store: Arc::new(Mutex::new(WeatherStore::new(path)?)),
        })
    }

    /// In-memory repository (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            store: Arc::new(Mutex::new(WeatherStore::in_memory()?)),
        })
    }

    /// Upsert one batch atomically; returns the count written.
    pub async fn upsert(&self, candidates: Vec<Candidate>) -> Result<usize, StoreError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.lock().upsert(&candidates))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }

    /// Records ascending by observed time; see [`WeatherStore::query`].
    pub async fn query(
        &self,
        location: &Location,
        kind: RecordKind,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<WeatherRecord>, StoreError> {
        let store = Arc::clone(&self.store);
        let location = location.clone();
        tokio::task::spawn_blocking(move || store.lock().query(&location, kind, range))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }

    /// The most recent record of a kind for a location.
    pub async fn latest(
        &self,
        location: &Location,
        kind: RecordKind,
    ) -> Result<Option<WeatherRecord>, StoreError> {
        let store = Arc::clone(&self.store);
        let location = location.clone();
        tokio::task::spawn_blocking(move || store.lock().latest(&location, kind))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }

    /// Total number of stored rows.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.lock().count())
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }
}

//! Forecast persistence.
//!
//! Every call runs in its own transaction on a connection checked out from the pool
//! for the duration of the call, so concurrent readers never share a cursor.
//! SQLite transactions are serializable, which covers read-committed consistency for
//! the aggregate query.

use std::{collections::BTreeMap, path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::debug;

use crate::{
    config::DatabaseConfig,
    model::{ForecastRecord, ForecastStatistics, Metric, RecordHolder, ValidationError},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no forecast data yet")]
    NoData,

    #[error("invalid forecast record: {0}")]
    Validation(#[from] ValidationError),

    #[error("unable to start transaction")]
    Begin(#[source] sqlx::Error),

    #[error("failed to commit transaction")]
    Commit(#[source] sqlx::Error),

    #[error("{source}; rollback failed as well: {rollback}")]
    Rollback {
        source: Box<StoreError>,
        rollback: sqlx::Error,
    },

    #[error("query failed")]
    Query(#[source] sqlx::Error),

    #[error("stored timestamp '{0}' is not RFC 3339")]
    InvalidTimestamp(String),

    #[error("unable to open database")]
    Connect(#[source] sqlx::Error),

    #[error("failed to create database directory")]
    DataDir(#[from] std::io::Error),

    #[error("failed to migrate database")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

const INSERT_FORECAST: &str = r#"
INSERT INTO forecasts (message_id, city, description, temp, humidity, wind, made_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

// Ties on a maximum go to the lexicographically smallest city.
const FORECAST_STATISTICS: &str = r#"
SELECT
    (SELECT COUNT(*) FROM forecasts) AS total,
    (SELECT MIN(made_at) FROM forecasts) AS first_made_at,
    top_temp.city,
    top_temp.temp,
    top_hum.city,
    top_hum.humidity,
    top_wind.city,
    top_wind.wind
FROM
    (SELECT city, temp FROM forecasts ORDER BY temp DESC, city ASC LIMIT 1) AS top_temp,
    (SELECT city, humidity FROM forecasts ORDER BY humidity DESC, city ASC LIMIT 1) AS top_hum,
    (SELECT city, wind FROM forecasts ORDER BY wind DESC, city ASC LIMIT 1) AS top_wind
"#;

type StatisticsRow = (i64, String, String, f64, String, i64, String, f64);

/// Append-only forecast store with aggregate statistics.
#[derive(Debug, Clone)]
pub struct ForecastStore {
    pool: SqlitePool,
}

impl ForecastStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database from config and apply migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&config.url)
            .map_err(StoreError::Connect)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        if let Some(dir) = opts.get_filename().parent().filter(|p| *p != Path::new("")) {
            std::fs::create_dir_all(dir)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(StoreError::Connect)?;

        let store = Self::new(pool);
        store.migrate().await?;

        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append one forecast record.
    ///
    /// The record is validated before the database is touched; duplicate message ids
    /// are stored as separate rows.
    pub async fn insert(&self, record: &ForecastRecord) -> Result<(), StoreError> {
        record.validate()?;

        let mut tx = self.pool.begin().await.map_err(StoreError::Begin)?;

        let outcome = sqlx::query(INSERT_FORECAST)
            .bind(record.message_id)
            .bind(&record.city)
            .bind(&record.description)
            .bind(record.temperature)
            .bind(record.humidity)
            .bind(record.wind_speed)
            .bind(format_timestamp(&record.made_at))
            .execute(&mut *tx)
            .await
            .map(|_| ())
            .map_err(StoreError::Query);

        finish_transaction(tx, outcome).await?;
        debug!(message_id = record.message_id, city = %record.city, "forecast stored");

        Ok(())
    }

    /// Aggregate statistics over every stored record.
    ///
    /// Fails with [`StoreError::NoData`] when nothing has been stored yet.
    pub async fn stat(&self) -> Result<ForecastStatistics, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Begin)?;
        let outcome = read_statistics(&mut tx).await;

        finish_transaction(tx, outcome).await
    }
}

async fn read_statistics(
    tx: &mut Transaction<'_, Sqlite>,
) -> Result<ForecastStatistics, StoreError> {
    let row: Option<StatisticsRow> = sqlx::query_as(FORECAST_STATISTICS)
        .fetch_optional(&mut **tx)
        .await
        .map_err(StoreError::Query)?;

    let (total, first_made_at, temp_city, temp, hum_city, hum, wind_city, wind) =
        row.ok_or(StoreError::NoData)?;

    let mut holders = BTreeMap::new();
    holders.insert(
        Metric::Temperature,
        RecordHolder {
            city: temp_city,
            value: temp,
        },
    );
    holders.insert(
        Metric::Humidity,
        RecordHolder {
            city: hum_city,
            value: hum as f64,
        },
    );
    holders.insert(
        Metric::Wind,
        RecordHolder {
            city: wind_city,
            value: wind,
        },
    );

    Ok(ForecastStatistics {
        total_records: total,
        first_record_at: parse_timestamp(&first_made_at)?,
        holders,
    })
}

/// Commit on success, roll back on failure.
///
/// A failed rollback is reported together with the error that caused it.
async fn finish_transaction<T>(
    tx: Transaction<'_, Sqlite>,
    outcome: Result<T, StoreError>,
) -> Result<T, StoreError> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(StoreError::Commit)?;
            Ok(value)
        }
        Err(err) => match tx.rollback().await {
            Ok(()) => Err(err),
            Err(rollback) => Err(StoreError::Rollback {
                source: Box::new(err),
                rollback,
            }),
        },
    }
}

// Fixed width, so textual MIN() is chronological.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn test_store() -> (ForecastStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("forecasts.db").display()),
            max_connections: 2,
        };

        let store = ForecastStore::connect(&config).await.unwrap();
        (store, dir)
    }

    #[test]
    fn timestamps_are_fixed_width_and_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);

        let (a, b) = (format_timestamp(&early), format_timestamp(&late));

        assert_eq!(a, "2024-03-01T09:05:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn timestamp_roundtrip_keeps_microseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap()
            + chrono::Duration::microseconds(123_456);

        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }

    #[test]
    fn garbage_timestamp_is_reported() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(matches!(err, StoreError::InvalidTimestamp(s) if s == "yesterday"));
    }

    #[test]
    fn rollback_failure_keeps_original_error() {
        let err = StoreError::Rollback {
            source: Box::new(StoreError::NoData),
            rollback: sqlx::Error::PoolClosed,
        };
        let msg = err.to_string();

        assert!(msg.starts_with("no forecast data yet"));
        assert!(msg.contains("rollback failed as well"));
    }

    #[tokio::test]
    async fn failed_commit_is_reported_as_commit_error() {
        let (store, _dir) = test_store().await;
        sqlx::query("CREATE TABLE parent (id INTEGER PRIMARY KEY)")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE child (pid INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        // The dangling reference is only checked at COMMIT.
        let mut tx = store.pool().begin().await.unwrap();
        sqlx::query("INSERT INTO child (pid) VALUES (42)")
            .execute(&mut *tx)
            .await
            .unwrap();

        let err = finish_transaction(tx, Ok(())).await.unwrap_err();
        assert!(matches!(err, StoreError::Commit(_)), "got {err:?}");

        let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(children, 0);
    }

    #[tokio::test]
    async fn failed_outcome_rolls_back() {
        let (store, _dir) = test_store().await;

        let mut tx = store.pool().begin().await.unwrap();
        sqlx::query("CREATE TABLE scratch (id INTEGER)")
            .execute(&mut *tx)
            .await
            .unwrap();

        let err = finish_transaction::<()>(tx, Err(StoreError::NoData))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoData), "got {err:?}");

        let tables: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(tables, 0);
    }
}

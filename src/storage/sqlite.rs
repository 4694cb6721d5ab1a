//! SQLite storage backend implementation
//!
//! Each key is one row in the `metrics` table, keyed by `(kind, id)`. Merge
//! semantics run server-side as an upsert: gauges overwrite `value`,
//! counters add to `delta` with two's-complement wrapping, matching
//! [`crate::metric::merge`]. Writes are wrapped in the shared
//! [`RetryPolicy`], retrying only connection-class failures (I/O, pool
//! timeouts, `SQLITE_BUSY`/`SQLITE_LOCKED`).
//!
//! Isolation is delegated to SQLite transactions; no in-process lock is held.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::metric::{Metric, MetricKey, MetricKind, MetricValue};
use crate::retry::RetryPolicy;

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

const UPSERT_GAUGE: &str = r#"
    INSERT INTO metrics (kind, id, delta, value)
    VALUES (?, ?, NULL, ?)
    ON CONFLICT (kind, id) DO UPDATE SET value = excluded.value
    RETURNING delta, value
"#;

// SQLite promotes an overflowing integer sum to REAL, so out-of-range sums
// are folded back by 2^64 in two steps that each stay within i64.
const UPSERT_COUNTER: &str = r#"
    INSERT INTO metrics (kind, id, delta, value)
    VALUES (?, ?, ?, NULL)
    ON CONFLICT (kind, id) DO UPDATE SET delta = CASE
        WHEN excluded.delta > 0 AND metrics.delta > 9223372036854775807 - excluded.delta
            THEN (metrics.delta - 9223372036854775807 - 1)
                + (excluded.delta - 9223372036854775807 - 1)
        WHEN excluded.delta < 0 AND metrics.delta < -9223372036854775807 - 1 - excluded.delta
            THEN (metrics.delta + 9223372036854775807 + 1)
                + (excluded.delta + 9223372036854775807 + 1)
        ELSE metrics.delta + excluded.delta
    END
    RETURNING delta, value
"#;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a database error is worth another attempt
///
/// Only connection-level failures qualify; constraint violations, syntax
/// errors and decode failures propagate immediately.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    }
}

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    location: String,
    retry: RetryPolicy,
}

impl SqliteBackend {
    /// Open (or create) the database file at `db_path`
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let location = db_path.as_ref().to_string_lossy().to_string();
        let options = SqliteConnectOptions::new().filename(&location);
        Self::connect(options, location, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Open a database from a DSN (`sqlite://path.db` or a bare path)
    pub async fn from_dsn(dsn: &str) -> StorageResult<Self> {
        if dsn.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(dsn)
                .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
            Self::connect(options, dsn.to_string(), DEFAULT_BUSY_TIMEOUT).await
        } else {
            Self::new(dsn).await
        }
    }

    async fn connect(
        options: SqliteConnectOptions,
        location: String,
        busy_timeout: Duration,
    ) -> StorageResult<Self> {
        info!("initializing SQLite backend at: {}", location);

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            location,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy (tests use a zero-delay table)
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn upsert<'e, E>(executor: E, metric: &Metric) -> Result<Metric, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let query = match metric.value {
            MetricValue::Gauge(value) => sqlx::query(UPSERT_GAUGE)
                .bind(MetricKind::Gauge.as_str())
                .bind(&metric.id)
                .bind(value),
            MetricValue::Counter(delta) => sqlx::query(UPSERT_COUNTER)
                .bind(MetricKind::Counter.as_str())
                .bind(&metric.id)
                .bind(delta),
        };

        let row = query.fetch_one(executor).await?;
        decode_value(metric.kind(), &metric.id, &row)
    }

    async fn upsert_one(&self, metric: &Metric) -> Result<Metric, sqlx::Error> {
        Self::upsert(&self.pool, metric).await
    }

    async fn upsert_batch(&self, metrics: &[Metric]) -> Result<Vec<Metric>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut merged = Vec::with_capacity(metrics.len());
        for metric in metrics {
            merged.push(Self::upsert(&mut *tx, metric).await?);
        }
        tx.commit().await?;
        Ok(merged)
    }
}

fn decode_value(kind: MetricKind, id: &str, row: &SqliteRow) -> Result<Metric, sqlx::Error> {
    let value = match kind {
        MetricKind::Gauge => MetricValue::Gauge(
            row.try_get::<Option<f64>, _>("value")?
                .ok_or_else(|| sqlx::Error::Decode(format!("gauge {id} has no value").into()))?,
        ),
        MetricKind::Counter => MetricValue::Counter(
            row.try_get::<Option<i64>, _>("delta")?
                .ok_or_else(|| sqlx::Error::Decode(format!("counter {id} has no delta").into()))?,
        ),
    };

    Ok(Metric {
        id: id.to_string(),
        value,
    })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &MetricKey) -> StorageResult<Metric> {
        let row = sqlx::query("SELECT delta, value FROM metrics WHERE kind = ? AND id = ?")
            .bind(key.kind.as_str())
            .bind(&key.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;

        Ok(decode_value(key.kind, &key.id, &row)?)
    }

    #[instrument(skip(self, metric), fields(key = %metric.key()))]
    async fn put(&self, metric: Metric) -> StorageResult<Metric> {
        let merged = self
            .retry
            .run(|| self.upsert_one(&metric), is_transient)
            .await?;
        Ok(merged)
    }

    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    async fn put_many(&self, metrics: Vec<Metric>) -> StorageResult<Vec<Metric>> {
        if metrics.is_empty() {
            return Ok(Vec::new());
        }

        let merged = self
            .retry
            .run(|| self.upsert_batch(&metrics), is_transient)
            .await?;
        debug!("batch upsert complete");
        Ok(merged)
    }

    async fn list_all(&self) -> StorageResult<Vec<Metric>> {
        let rows = sqlx::query("SELECT kind, id, delta, value FROM metrics")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                let id: String = row.try_get("id")?;
                let kind = kind
                    .parse::<MetricKind>()
                    .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                Ok(decode_value(kind, &id, row)?)
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("location".to_string(), self.location.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Err(StorageError::UnhealthyBackend(e.to_string()))
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

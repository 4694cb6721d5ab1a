//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Counters accumulate across backend restarts
//! - Backend selection prefers a DSN over the file path

use metrics_relay::config::StorageConfig;
use metrics_relay::metric::{Metric, MetricKey, MetricKind, MetricValue};
use metrics_relay::storage::open_backend;
use metrics_relay::storage::sqlite::SqliteBackend;
use metrics_relay::storage::StorageBackend;
use tempfile::tempdir;

#[tokio::test]
async fn test_counters_survive_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("metrics.db");

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    backend.put(Metric::counter("PollCount", 5)).await.unwrap();
    backend.put(Metric::gauge("Alloc", 10.0)).await.unwrap();
    backend.close().await.unwrap();

    let reopened = SqliteBackend::new(&db_path).await.unwrap();
    let merged = reopened.put(Metric::counter("PollCount", 6)).await.unwrap();
    assert_eq!(merged.value, MetricValue::Counter(11));

    let alloc = reopened
        .get(&MetricKey::new(MetricKind::Gauge, "Alloc"))
        .await
        .unwrap();
    assert_eq!(alloc, Metric::gauge("Alloc", 10.0));
}

#[tokio::test]
async fn test_dsn_takes_precedence() {
    let dir = tempdir().unwrap();
    let dsn = format!("sqlite:{}", dir.path().join("relay.db").display());
    let config = StorageConfig::select(Some(&dsn), "/tmp/ignored.json", 300);
    assert!(matches!(config, StorageConfig::Sqlite { .. }));
    assert!(config.checkpoint_path().is_none());

    let backend = open_backend(&config).await.unwrap();
    backend
        .put_many(vec![Metric::counter("c", 1), Metric::counter("c", 2)])
        .await
        .unwrap();
    assert_eq!(backend.list_all().await.unwrap(), vec![Metric::counter("c", 3)]);
    backend.health_check().await.unwrap();
}

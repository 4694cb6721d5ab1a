//! Integration tests for checkpoint and restore
//!
//! These tests verify that:
//! - A checkpoint written by one collector restores into a fresh one
//! - Synchronous file storage checkpoints every write
//! - Backend selection follows the storage configuration

use std::sync::Arc;

use metrics_relay::collector::MetricService;
use metrics_relay::config::StorageConfig;
use metrics_relay::metric::{Metric, MetricKey, MetricKind};
use metrics_relay::storage::{checkpoint, open_backend};
use tempfile::tempdir;

async fn file_service(config: &StorageConfig) -> MetricService {
    let storage = open_backend(config).await.unwrap();
    MetricService::new(storage, config.checkpoint_path().map(|p| p.to_path_buf()))
}

fn sorted(mut metrics: Vec<Metric>) -> Vec<Metric> {
    metrics.sort_by(|a, b| a.id.cmp(&b.id));
    metrics
}

#[tokio::test]
async fn test_checkpoint_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics-db.json");
    let config = StorageConfig::select(None, path.to_str().unwrap(), 300);
    assert!(matches!(config, StorageConfig::File { .. }));

    let service = file_service(&config).await;
    for metric in [
        Metric::counter("PollCount", 5),
        Metric::gauge("Alloc", 10.0),
        Metric::counter("PollCount", 6),
        Metric::gauge("Alloc", 15.0),
        Metric::gauge("RandomValue", 0.25),
    ] {
        service.set_metric(metric).await.unwrap();
    }

    // asynchronous mode: nothing on disk until the first checkpoint
    assert!(checkpoint::load(&path).await.unwrap().is_empty());
    service.shutdown().await.unwrap();

    let restored = file_service(&config).await;
    assert_eq!(restored.restore().await.unwrap(), 3);

    assert_eq!(
        sorted(restored.list_all().await.unwrap()),
        vec![
            Metric::gauge("Alloc", 15.0),
            Metric::counter("PollCount", 11),
            Metric::gauge("RandomValue", 0.25),
        ]
    );
    assert_eq!(
        restored
            .get_metric_value(&MetricKey::new(MetricKind::Counter, "PollCount"))
            .await
            .unwrap(),
        "11"
    );
}

#[tokio::test]
async fn test_synchronous_storage_writes_every_update() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics-db.json");
    let config = StorageConfig::select(None, path.to_str().unwrap(), 0);

    let service = file_service(&config).await;
    service.set_metric(Metric::counter("c", 2)).await.unwrap();
    assert_eq!(
        checkpoint::load(&path).await.unwrap(),
        vec![Metric::counter("c", 2)]
    );

    service
        .set_metrics(vec![Metric::counter("c", 3), Metric::gauge("g", 1.0)])
        .await
        .unwrap();
    assert_eq!(
        sorted(checkpoint::load(&path).await.unwrap()),
        vec![Metric::counter("c", 5), Metric::gauge("g", 1.0)]
    );
}

#[tokio::test]
async fn test_empty_path_selects_memory() {
    let config = StorageConfig::select(None, "", 300);
    assert_eq!(config, StorageConfig::Memory);

    let service = Arc::new(file_service(&config).await);
    assert_eq!(service.restore().await.unwrap(), 0);
    service.set_metric(Metric::gauge("g", 2.0)).await.unwrap();
    service.shutdown().await.unwrap();
}

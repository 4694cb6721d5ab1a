//! In-memory storage backend (no persistence)
//!
//! The snapshot lives only in process memory and is lost on restart. The
//! agent uses two instances of this backend (gauges and counters), and the
//! collector falls back to it when no checkpoint file or database is
//! configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::snapshot::Snapshot;
use crate::metric::{Metric, MetricKey};

/// In-memory storage backend
///
/// Reads (`get`, `list_all`, `health_check`) take the shared lock, writes
/// take the exclusive lock.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshot: RwLock<Snapshot>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &MetricKey) -> StorageResult<Metric> {
        self.snapshot
            .read()
            .await
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.clone()))
    }

    async fn put(&self, metric: Metric) -> StorageResult<Metric> {
        let merged = self.snapshot.write().await.apply(&metric);
        trace!("stored {} = {}", metric.key(), merged.value);
        Ok(merged)
    }

    async fn put_many(&self, metrics: Vec<Metric>) -> StorageResult<Vec<Metric>> {
        let mut snapshot = self.snapshot.write().await;
        Ok(metrics.iter().map(|metric| snapshot.apply(metric)).collect())
    }

    async fn list_all(&self) -> StorageResult<Vec<Metric>> {
        Ok(self.snapshot.read().await.to_metrics())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let count = self.snapshot.read().await.len();
        Ok(HealthStatus {
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_metrics".to_string(), count.to_string()),
            ]),
        })
    }
}

//! Collector service
//!
//! Thin orchestration over a [`StorageBackend`]: merge and query operations
//! used by the HTTP and RPC front-ends, plus checkpoint/restore for the
//! file backend.
//!
//! ## Lifecycle
//!
//! ```text
//! restore (once, if enabled) → serve requests ─┬─→ checkpoint (every interval)
//!                                              └─→ shutdown: checkpoint + close
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::metric::{Metric, MetricKey};
use crate::storage::{HealthStatus, StorageBackend, StorageResult, checkpoint};

pub struct MetricService {
    storage: Arc<dyn StorageBackend>,

    /// Checkpoint file to restore from (file backend only)
    checkpoint_path: Option<PathBuf>,
}

impl MetricService {
    pub fn new(storage: Arc<dyn StorageBackend>, checkpoint_path: Option<PathBuf>) -> Self {
        Self {
            storage,
            checkpoint_path,
        }
    }

    #[instrument(skip(self, metric), fields(key = %metric.key()))]
    pub async fn set_metric(&self, metric: Metric) -> StorageResult<Metric> {
        self.storage.put(metric).await
    }

    /// Merge a batch in input order
    pub async fn set_metrics(&self, metrics: Vec<Metric>) -> StorageResult<Vec<Metric>> {
        self.storage.put_many(metrics).await
    }

    pub async fn get_metric(&self, key: &MetricKey) -> StorageResult<Metric> {
        self.storage.get(key).await
    }

    /// Stored value formatted as text (`15`, `0.125`, `11`)
    pub async fn get_metric_value(&self, key: &MetricKey) -> StorageResult<String> {
        Ok(self.storage.get(key).await?.value.to_string())
    }

    pub async fn list_all(&self) -> StorageResult<Vec<Metric>> {
        self.storage.list_all().await
    }

    pub async fn health(&self) -> StorageResult<HealthStatus> {
        self.storage.health_check().await
    }

    /// Write the current snapshot to the checkpoint file
    pub async fn checkpoint(&self) -> StorageResult<()> {
        self.storage.flush().await
    }

    /// Replay the checkpoint file through [`MetricService::set_metric`]
    ///
    /// Returns the number of records replayed. Without a checkpoint path
    /// this does nothing.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> StorageResult<usize> {
        let Some(path) = &self.checkpoint_path else {
            debug!("no checkpoint file configured, nothing to restore");
            return Ok(0);
        };

        let records = checkpoint::load(path).await?;
        let count = records.len();
        for metric in records {
            self.set_metric(metric).await?;
        }

        info!("restored {count} metrics from {}", path.display());
        Ok(count)
    }

    /// Final checkpoint, then release the backend
    pub async fn shutdown(&self) -> StorageResult<()> {
        self.checkpoint().await?;
        self.storage.close().await
    }
}

/// Checkpoint `service` every `period` until `token` is cancelled
pub fn spawn_checkpointer(
    service: Arc<MetricService>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("starting checkpointer with period {period:?}");
        let mut ticker = tokio::time::interval(period);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = service.checkpoint().await {
                        error!("periodic checkpoint failed: {e}");
                    }
                }
            }
        }

        debug!("checkpointer stopped");
    })
}

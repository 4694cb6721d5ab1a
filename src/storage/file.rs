//! File-checkpointed storage backend
//!
//! Wraps an in-memory snapshot and mirrors it to a JSON checkpoint file.
//!
//! ## Write Modes
//!
//! - **Synchronous**: every `put`/`put_many` rewrites the whole file before
//!   returning. Used when no periodic checkpoint task runs.
//! - **Asynchronous**: mutations stay in memory; a scheduler calls
//!   [`StorageBackend::flush`] on an interval and once at shutdown.
//!
//! The file is written while the exclusive lock is held, so every
//! checkpoint reflects one coherent snapshot. In synchronous mode an update
//! is only kept in memory once its checkpoint has been written.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::backend::{HealthStatus, StorageBackend};
use super::checkpoint;
use super::error::{StorageError, StorageResult};
use super::snapshot::Snapshot;
use crate::metric::{Metric, MetricKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Synchronous,
    Asynchronous,
}

impl WriteMode {
    /// A checkpoint interval of zero means synchronous writes
    pub fn from_interval_secs(secs: u64) -> Self {
        if secs == 0 {
            WriteMode::Synchronous
        } else {
            WriteMode::Asynchronous
        }
    }
}

#[derive(Debug)]
pub struct FileBackend {
    snapshot: RwLock<Snapshot>,
    path: PathBuf,
    mode: WriteMode,
}

impl FileBackend {
    /// Create a backend with an empty snapshot
    ///
    /// The checkpoint is not read here; restoring is a separate replay
    /// step so counter semantics are applied to every record.
    pub fn new(path: impl Into<PathBuf>, mode: WriteMode) -> Self {
        let path = path.into();
        debug!("file backend at {} ({mode:?})", path.display());
        Self {
            snapshot: RwLock::new(Snapshot::new()),
            path,
            mode,
        }
    }

    /// Apply `update` under the write lock
    ///
    /// Synchronous mode stages the update on a copy, writes the checkpoint,
    /// then swaps the copy in; a failed write leaves the snapshot untouched.
    async fn commit<T, F>(&self, update: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Snapshot) -> T + Send,
        T: Send,
    {
        let mut snapshot = self.snapshot.write().await;
        match self.mode {
            WriteMode::Asynchronous => Ok(update(&mut snapshot)),
            WriteMode::Synchronous => {
                let mut staged = snapshot.clone();
                let result = update(&mut staged);
                checkpoint::save(&self.path, &staged.to_metrics()).await?;
                *snapshot = staged;
                Ok(result)
            }
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &MetricKey) -> StorageResult<Metric> {
        self.snapshot
            .read()
            .await
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.clone()))
    }

    async fn put(&self, metric: Metric) -> StorageResult<Metric> {
        self.commit(|snapshot| snapshot.apply(&metric)).await
    }

    async fn put_many(&self, metrics: Vec<Metric>) -> StorageResult<Vec<Metric>> {
        self.commit(|snapshot| metrics.iter().map(|metric| snapshot.apply(metric)).collect())
            .await
    }

    async fn list_all(&self) -> StorageResult<Vec<Metric>> {
        Ok(self.snapshot.read().await.to_metrics())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let count = self.snapshot.read().await.len();
        Ok(HealthStatus {
            message: "File storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "file".to_string()),
                ("path".to_string(), self.path.display().to_string()),
                ("total_metrics".to_string(), count.to_string()),
            ]),
        })
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn flush(&self) -> StorageResult<()> {
        let snapshot = self.snapshot.write().await;
        checkpoint::save(&self.path, &snapshot.to_metrics()).await
    }
}

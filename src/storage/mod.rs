//! Storage engine for collected metrics
//!
//! A trait-based key/value store over the metric model. Every backend
//! applies the same merge rules (gauges replace, counters add) and differs
//! only in durability.
//!
//! ## Backends
//!
//! - **In-memory**: snapshot lives in process memory only
//! - **File**: in-memory snapshot mirrored to a JSON checkpoint, either on
//!   every write or on a schedule
//! - **SQLite** (`storage-sqlite` feature): one upserted row per key
//!
//! ## Usage
//!
//! ```no_run
//! use metrics_relay::config::StorageConfig;
//! use metrics_relay::metric::Metric;
//! use metrics_relay::storage::open_backend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = open_backend(&StorageConfig::Memory).await?;
//!     backend.put(Metric::counter("PollCount", 1)).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
mod snapshot;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, WriteMode};
pub use memory::MemoryBackend;

use crate::config::StorageConfig;

/// Construct the backend selected by `config`
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Memory => {
            info!("using in-memory storage");
            Ok(Arc::new(MemoryBackend::new()))
        }
        StorageConfig::File {
            path,
            store_interval,
        } => {
            let mode = WriteMode::from_interval_secs(*store_interval);
            info!("using file storage at {} ({mode:?})", path.display());
            Ok(Arc::new(FileBackend::new(path.clone(), mode)))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { dsn } => {
            info!("using SQLite storage");
            Ok(Arc::new(sqlite::SqliteBackend::from_dsn(dsn).await?))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}

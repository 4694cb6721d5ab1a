//! Checkpoint file format
//!
//! A checkpoint is a JSON array of metric records (`{id, type, delta?,
//! value?}`), one per key. Writes replace the whole file. A missing or
//! empty file loads as an empty list: first run and an emptied file are
//! treated the same.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::error::{StorageError, StorageResult};
use crate::metric::{Metric, MetricRecord};

/// Serialize `metrics` and replace the file at `path`
#[instrument(skip(metrics), fields(count = metrics.len()))]
pub async fn save(path: &Path, metrics: &[Metric]) -> StorageResult<()> {
    let records: Vec<MetricRecord> = metrics.iter().cloned().map(MetricRecord::from).collect();
    let data = serde_json::to_vec(&records)?;

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &data).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!("wrote {} metrics to {}", records.len(), path.display());
    Ok(())
}

/// Read the checkpoint at `path`
#[instrument]
pub async fn load(path: &Path) -> StorageResult<Vec<Metric>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no checkpoint at {}, starting empty", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        debug!("checkpoint at {} is empty", path.display());
        return Ok(Vec::new());
    }

    let records: Vec<MetricRecord> = serde_json::from_slice(&data)?;
    records
        .into_iter()
        .map(|record| {
            Metric::try_from(record).map_err(|e| StorageError::SerializationError(e.to_string()))
        })
        .collect()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

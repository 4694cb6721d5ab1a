//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use crate::metric::{Metric, MetricKey};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Key/value store over the metric model
///
/// Every backend (in-memory, file-checkpointed, SQLite) behaves the same
/// from the caller's side: `put` merges the incoming metric into the slot
/// named by its [`MetricKey`] and returns the post-merge value. Backends
/// differ only in durability.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across the
/// agent's loops and the collector's request handlers. Synchronisation is
/// internal to each backend; callers never hold locks of their own.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the stored metric, or `StorageError::NotFound`
    async fn get(&self, key: &MetricKey) -> StorageResult<Metric>;

    /// Merge one metric and return the stored result
    async fn put(&self, metric: Metric) -> StorageResult<Metric>;

    /// Merge metrics in input order
    ///
    /// The same key may repeat within one batch; later entries observe the
    /// accumulation of earlier ones. The returned vector holds the
    /// post-merge value for each input entry, in input order.
    async fn put_many(&self, metrics: Vec<Metric>) -> StorageResult<Vec<Metric>>;

    /// Copy of every stored metric, in no particular order
    async fn list_all(&self) -> StorageResult<Vec<Metric>>;

    /// Liveness probe
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Write pending state to durable storage
    ///
    /// Only meaningful for the asynchronous file backend; a no-op elsewhere.
    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Release backend resources
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

//! Host metrics relay: an agent that samples and reports host metrics, and a
//! collector that merges them into a pluggable store.

pub mod agent;
#[cfg(feature = "api")]
pub mod api;
pub mod collector;
pub mod config;
pub mod metric;
pub mod retry;
pub mod storage;
pub mod transport;
pub mod util;

pub use metric::{Metric, MetricError, MetricKey, MetricKind, MetricValue};

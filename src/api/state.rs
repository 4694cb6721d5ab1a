//! Shared state for API handlers

use std::sync::Arc;

use crate::collector::MetricService;
use crate::transport::envelope::EnvelopeOpener;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Merge and query operations over the configured backend
    pub service: Arc<MetricService>,

    /// Opens request envelopes and signs responses
    pub opener: Arc<EnvelopeOpener>,
}

impl ApiState {
    pub fn new(service: Arc<MetricService>, opener: EnvelopeOpener) -> Self {
        Self {
            service,
            opener: Arc::new(opener),
        }
    }
}

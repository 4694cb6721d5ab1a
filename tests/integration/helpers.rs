//! Helper functions for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_relay::agent::sampler::Sampler;
use metrics_relay::collector::MetricService;
use metrics_relay::config::AgentConfig;
use metrics_relay::metric::Metric;
use metrics_relay::storage::MemoryBackend;

/// Deterministic sampler reporting two gauges
pub struct FixedSampler;

impl Sampler for FixedSampler {
    fn sample(&mut self) -> Vec<Metric> {
        vec![Metric::gauge("Alloc", 1.5), Metric::gauge("HeapSys", 64.0)]
    }
}

pub fn memory_service() -> Arc<MetricService> {
    Arc::new(MetricService::new(Arc::new(MemoryBackend::new()), None))
}

pub fn fast_agent_config(address: SocketAddr, key: Option<&str>) -> AgentConfig {
    AgentConfig {
        address: address.to_string(),
        poll_interval: Duration::from_millis(20),
        report_interval: Duration::from_millis(50),
        rate_limit: 2,
        key: key.map(str::to_string),
        ..AgentConfig::default()
    }
}

//! Host metric sampling

use sysinfo::System;

use crate::metric::Metric;

pub const RANDOM_VALUE: &str = "RandomValue";

/// Source of gauge observations for the collector loop
pub trait Sampler: Send {
    fn sample(&mut self) -> Vec<Metric>;
}

/// Memory, swap and CPU gauges from `sysinfo`, plus a random gauge
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // cpu usage is computed between two refreshes
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self) -> Vec<Metric> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut metrics = vec![
            Metric::gauge("TotalMemory", self.system.total_memory() as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
            Metric::gauge("UsedMemory", self.system.used_memory() as f64),
            Metric::gauge("TotalSwap", self.system.total_swap() as f64),
            Metric::gauge("UsedSwap", self.system.used_swap() as f64),
        ];

        metrics.extend(self.system.cpus().iter().enumerate().map(|(i, cpu)| {
            Metric::gauge(format!("CPUutilization{}", i + 1), cpu.cpu_usage() as f64)
        }));
        metrics.push(Metric::gauge(
            "CPUutilizationAvg",
            self.system.global_cpu_usage() as f64,
        ));
        metrics.push(Metric::gauge(RANDOM_VALUE, rand::random::<f64>()));

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricKind, MetricValue};

    #[test]
    fn test_system_sample_is_all_gauges() {
        let mut sampler = SystemSampler::new();
        let metrics = sampler.sample();

        assert!(metrics.iter().all(|m| m.kind() == MetricKind::Gauge));
        assert!(metrics.iter().any(|m| m.id == "TotalMemory"));
        assert!(metrics.iter().any(|m| m.id == "CPUutilizationAvg"));

        let random = metrics.iter().find(|m| m.id == RANDOM_VALUE).unwrap();
        assert!(matches!(random.value, MetricValue::Gauge(v) if (0.0..1.0).contains(&v)));
    }
}

//! Snapshot: the full key→value state of one backend

use std::collections::HashMap;

use crate::metric::{Metric, MetricKey, MetricValue, merge};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    slots: HashMap<MetricKey, MetricValue>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, key: &MetricKey) -> Option<Metric> {
        self.slots.get(key).map(|value| Metric {
            id: key.id.clone(),
            value: *value,
        })
    }

    /// Merge `metric` into its slot and return the stored result
    pub fn apply(&mut self, metric: &Metric) -> Metric {
        let key = metric.key();
        let merged = merge(self.slots.get(&key), metric);
        self.slots.insert(key, merged.value);
        merged
    }

    pub fn to_metrics(&self) -> Vec<Metric> {
        self.slots
            .iter()
            .map(|(key, value)| Metric {
                id: key.id.clone(),
                value: *value,
            })
            .collect()
    }
}

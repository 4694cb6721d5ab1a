//! Metric model and merge rules
//!
//! A [`Metric`] is either a gauge (instantaneous `f64`, replaced on every
//! update) or a counter (`i64` delta, accumulated by addition). The value
//! enum makes "exactly one of value/delta" a property of the type; the
//! optional-field wire shape only exists in [`MetricRecord`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors raised while interpreting metric input
///
/// Both variants are permanent: a record that fails here is rejected and
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    /// Type discriminator is neither `gauge` nor `counter`
    InvalidMetricKind(String),

    /// Value is missing or does not parse for the given kind
    InvalidMetricValue(String),
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::InvalidMetricKind(kind) => write!(f, "invalid metric kind: {kind}"),
            MetricError::InvalidMetricValue(msg) => write!(f, "invalid metric value: {msg}"),
        }
    }
}

impl std::error::Error for MetricError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::InvalidMetricKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a textual value according to `kind`
    ///
    /// Gauges parse as `f64`, counters as `i64`.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .map(MetricValue::Gauge)
                .map_err(|e| MetricError::InvalidMetricValue(format!("{raw:?}: {e}"))),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|e| MetricError::InvalidMetricValue(format!("{raw:?}: {e}"))),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(value) => write!(f, "{value}"),
            MetricValue::Counter(delta) => write!(f, "{delta}"),
        }
    }
}

/// Identifies one stored slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub kind: MetricKind,
    pub id: String,
}

impl MetricKey {
    pub fn new(kind: MetricKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A single observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricRecord", into = "MetricRecord")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Build a metric from its textual parts (`/update/{type}/{id}/{value}`)
    pub fn parse(kind: &str, id: &str, raw_value: &str) -> Result<Self, MetricError> {
        let kind = kind.parse::<MetricKind>()?;
        Ok(Self {
            id: id.to_string(),
            value: MetricValue::parse(kind, raw_value)?,
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.kind(), self.id.clone())
    }
}

/// Combine a stored value with an incoming observation
///
/// Counters add (wrapping on `i64` overflow, absent counts as 0); gauges are
/// replaced by the incoming value.
pub fn merge(existing: Option<&MetricValue>, incoming: &Metric) -> Metric {
    let value = match (existing, incoming.value) {
        (Some(MetricValue::Counter(current)), MetricValue::Counter(delta)) => {
            MetricValue::Counter(current.wrapping_add(delta))
        }
        (_, value) => value,
    };

    Metric {
        id: incoming.id.clone(),
        value,
    }
}

/// Wire and checkpoint shape: `{id, type, delta?, value?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,

    #[serde(rename = "type")]
    pub mtype: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<MetricRecord> for Metric {
    type Error = MetricError;

    fn try_from(record: MetricRecord) -> Result<Self, Self::Error> {
        let value = match record.mtype.parse::<MetricKind>()? {
            MetricKind::Gauge => record.value.map(MetricValue::Gauge).ok_or_else(|| {
                MetricError::InvalidMetricValue(format!("gauge {} has no value", record.id))
            })?,
            MetricKind::Counter => record.delta.map(MetricValue::Counter).ok_or_else(|| {
                MetricError::InvalidMetricValue(format!("counter {} has no delta", record.id))
            })?,
        };

        Ok(Metric {
            id: record.id,
            value,
        })
    }
}

impl From<Metric> for MetricRecord {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Gauge(value) => (None, Some(value)),
            MetricValue::Counter(delta) => (Some(delta), None),
        };

        Self {
            id: metric.id,
            mtype: metric.value.kind().to_string(),
            delta,
            value,
        }
    }
}

/// Lookup request body for `POST /value/`
#[derive(Debug, Clone, Deserialize)]
pub struct MetricQuery {
    pub id: String,

    #[serde(rename = "type")]
    pub mtype: String,
}

impl MetricQuery {
    pub fn key(&self) -> Result<MetricKey, MetricError> {
        Ok(MetricKey::new(self.mtype.parse()?, self.id.clone()))
    }
}

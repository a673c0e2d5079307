//! Metric registry and sample sink seams, plus in-memory implementations

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::debug;

use crate::error::{Error, Result};

static METRIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{N}\._ !\?/&#\(\)<>%-]{1,128}$").expect("metric name pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Counter,
    Gauge,
    Trend,
    Rate,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Trend => "trend",
            MetricKind::Rate => "rate",
        }
    }

    /// Parse a kind name; unknown names become counters
    pub fn parse_lenient(name: &str) -> Self {
        match name {
            "gauge" => MetricKind::Gauge,
            "trend" => MetricKind::Trend,
            "rate" => MetricKind::Rate,
            _ => MetricKind::Counter,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a metric's values measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueType {
    #[default]
    Default,
    /// Milliseconds
    Time,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub contains: ValueType,
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub metric: Arc<Metric>,
    pub tags: BTreeMap<String, String>,
    pub value: f64,
    pub time: SystemTime,
}

impl Sample {
    pub fn new(metric: Arc<Metric>, tags: BTreeMap<String, String>, value: f64) -> Self {
        Self {
            metric,
            tags,
            value,
            time: SystemTime::now(),
        }
    }
}

/// The host's typed metric registry
pub trait MetricRegistry: Send + Sync {
    /// Register `name`, or return the existing metric when the kind matches.
    /// A kind mismatch on an existing name is an error.
    fn register(&self, name: &str, kind: MetricKind, contains: ValueType) -> Result<Arc<Metric>>;
}

/// The host's sample output channel
pub trait SampleSink: Send + Sync {
    fn push(&self, sample: Sample);
}

/// Process-lifetime in-memory registry
#[derive(Debug, Default)]
pub struct Registry {
    metrics: Mutex<HashMap<String, Arc<Metric>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Metric>> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricRegistry for Registry {
    fn register(&self, name: &str, kind: MetricKind, contains: ValueType) -> Result<Arc<Metric>> {
        if !METRIC_NAME.is_match(name) {
            return Err(Error::Registry(format!("invalid metric name {name:?}")));
        }

        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = metrics.get(name) {
            if existing.kind != kind {
                return Err(Error::Registry(format!(
                    "metric {name:?} already registered as {}, cannot re-register as {kind}",
                    existing.kind
                )));
            }
            return Ok(Arc::clone(existing));
        }

        debug!("Registering metric {} ({})", name, kind);
        let metric = Arc::new(Metric {
            name: name.to_string(),
            kind,
            contains,
        });
        metrics.insert(name.to_string(), Arc::clone(&metric));
        Ok(metric)
    }
}

/// Sink that keeps every pushed sample in memory
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Mutex<Vec<Sample>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.samples.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Samples recorded against one metric, in push order
    pub fn for_metric(&self, name: &str) -> Vec<Sample> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.metric.name == name)
            .collect()
    }
}

impl SampleSink for SampleBuffer {
    fn push(&self, sample: Sample) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }
}

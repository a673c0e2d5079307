//! Invocation-scoped telemetry collection for Rust-authored guests.
//!
//! Guest code calls the ambient functions ([`counter`], [`check`], ...)
//! without threading a handle through. They write into the collector
//! installed by [`collect`] on the current thread; outside of `collect`
//! they are no-ops.

use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::debug;

use crate::codec::{self, CheckEntry, Telemetry, TelemetryEntry};
use crate::metrics::MetricKind;

thread_local! {
    static CURRENT: RefCell<Option<Collector>> = const { RefCell::new(None) };
}

/// Buffers filled during one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collector {
    telemetry: Telemetry,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &[TelemetryEntry] {
        &self.telemetry.metrics
    }

    pub fn checks(&self) -> &[CheckEntry] {
        &self.telemetry.checks
    }

    pub fn into_telemetry(self) -> Telemetry {
        self.telemetry
    }

    /// Write the buffered entries into `result` under the reserved keys
    pub fn attach(&self, result: &mut Map<String, Value>) {
        if !self.telemetry.metrics.is_empty() {
            result.insert(
                codec::METRICS_KEY.to_string(),
                serde_json::to_value(&self.telemetry.metrics).unwrap_or(Value::Null),
            );
        }
        if !self.telemetry.checks.is_empty() {
            result.insert(
                codec::CHECKS_KEY.to_string(),
                serde_json::to_value(&self.telemetry.checks).unwrap_or(Value::Null),
            );
        }
    }

    /// Render `result` plus the buffered entries in wire form
    pub fn encode(&self, result: &Map<String, Value>) -> String {
        codec::encode_result(result, &self.telemetry)
    }
}

/// Restores the previously installed collector when dropped, including on unwind
struct ScopeGuard {
    previous: Option<Option<Collector>>,
}

impl ScopeGuard {
    fn install(collector: Collector) -> Self {
        let previous = CURRENT.with(|current| current.replace(Some(collector)));
        Self {
            previous: Some(previous),
        }
    }

    fn finish(mut self) -> Collector {
        let previous = self.previous.take().flatten();
        CURRENT
            .with(|current| current.replace(previous))
            .unwrap_or_default()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|current| current.replace(previous));
        }
    }
}

/// Run `f` with a fresh collector installed, returning its output and what it collected
pub fn collect<F, R>(f: F) -> (R, Collector)
where
    F: FnOnce() -> R,
{
    let guard = ScopeGuard::install(Collector::new());
    let output = f();
    (output, guard.finish())
}

/// Whether a collector is installed on this thread
pub fn is_active() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

fn record(f: impl FnOnce(&mut Collector)) {
    CURRENT.with(|current| match current.borrow_mut().as_mut() {
        Some(collector) => f(collector),
        None => debug!("No active collector; dropping emission"),
    });
}

/// Handle returned by the metric factories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricHandle {
    kind: MetricKind,
    name: String,
}

impl MetricHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Append one emission for counters, trends and rates
    pub fn add(&self, value: f64) {
        self.add_with_tags(value, BTreeMap::new());
    }

    pub fn add_with_tags(&self, value: f64, tags: BTreeMap<String, String>) {
        let mut entry = TelemetryEntry::new(self.kind, self.name.clone(), value);
        entry.tags = tags;
        record(|collector| collector.telemetry.metrics.push(entry));
    }

    /// Gauge spelling of [`MetricHandle::add`]
    pub fn set(&self, value: f64) {
        self.add(value);
    }

    pub fn set_with_tags(&self, value: f64, tags: BTreeMap<String, String>) {
        self.add_with_tags(value, tags);
    }
}

fn handle(kind: MetricKind, name: &str) -> MetricHandle {
    MetricHandle {
        kind,
        name: name.to_string(),
    }
}

pub fn counter(name: &str) -> MetricHandle {
    handle(MetricKind::Counter, name)
}

pub fn gauge(name: &str) -> MetricHandle {
    handle(MetricKind::Gauge, name)
}

pub fn trend(name: &str) -> MetricHandle {
    handle(MetricKind::Trend, name)
}

pub fn rate(name: &str) -> MetricHandle {
    handle(MetricKind::Rate, name)
}

/// Register a named pass/fail outcome; returns `passed`
pub fn check(name: &str, passed: bool) -> bool {
    record(|collector| {
        collector
            .telemetry
            .checks
            .push(CheckEntry::new(name, passed))
    });
    passed
}

//! Mapping decoded telemetry onto typed metrics in the host registry

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::codec::{CheckEntry, Telemetry, TelemetryEntry};
use crate::error::Result;
use crate::metrics::{Metric, MetricKind, MetricRegistry, Sample, SampleSink, ValueType};

/// Name of the rate metric every check sample lands on
pub const CHECKS_METRIC: &str = "checks";
/// Tag carrying the check name on check samples
pub const CHECK_TAG: &str = "check";

/// Name → metric cache owned by one dispatcher. The first kind seen for a
/// name is kept for the life of the cache.
#[derive(Debug, Default)]
pub struct MetricCache {
    metrics: Mutex<HashMap<String, Arc<Metric>>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `name`, registering it as `kind` on first sight. The lock is
    /// held across registration so concurrent callers never race on kind.
    pub fn get_or_register(
        &self,
        registry: &dyn MetricRegistry,
        name: &str,
        kind: MetricKind,
    ) -> Result<Arc<Metric>> {
        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(metric) = metrics.get(name) {
            if metric.kind != kind {
                debug!(
                    "Metric {} resent as {}, keeping first-seen kind {}",
                    name, kind, metric.kind
                );
            }
            return Ok(Arc::clone(metric));
        }

        let metric = registry.register(name, kind, ValueType::Default)?;
        metrics.insert(name.to_string(), Arc::clone(&metric));
        Ok(metric)
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

/// Numeric coercion for telemetry values; anything else is dropped
pub fn coerce_value(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// Entry tags first, ambient tags on top: identity tags cannot be overwritten
pub fn merge_tags(
    entry_tags: &BTreeMap<String, String>,
    ambient: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut tags = entry_tags.clone();
    tags.extend(ambient.iter().map(|(k, v)| (k.clone(), v.clone())));
    tags
}

/// Counts of what a merge pushed and dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub samples: usize,
    pub dropped: usize,
}

/// Push one sample per telemetry entry and one per check, in arrival order
pub fn merge_telemetry(
    telemetry: &Telemetry,
    cache: &MetricCache,
    registry: &dyn MetricRegistry,
    checks_metric: &Arc<Metric>,
    sink: &dyn SampleSink,
    ambient: &BTreeMap<String, String>,
) -> MergeReport {
    let mut report = MergeReport::default();

    for entry in &telemetry.metrics {
        match sample_for_entry(entry, cache, registry, ambient) {
            Some(sample) => {
                sink.push(sample);
                report.samples += 1;
            }
            None => report.dropped += 1,
        }
    }

    for check in &telemetry.checks {
        sink.push(sample_for_check(check, checks_metric, ambient));
        report.samples += 1;
    }

    if report.dropped > 0 {
        warn!("Dropped {} telemetry entries", report.dropped);
    }
    report
}

fn sample_for_entry(
    entry: &TelemetryEntry,
    cache: &MetricCache,
    registry: &dyn MetricRegistry,
    ambient: &BTreeMap<String, String>,
) -> Option<Sample> {
    let Some(value) = coerce_value(&entry.value) else {
        debug!(
            "Dropping {} sample for {}: non-numeric value {}",
            entry.kind, entry.name, entry.value
        );
        return None;
    };

    let metric = match cache.get_or_register(registry, &entry.name, entry.kind) {
        Ok(metric) => metric,
        Err(err) => {
            warn!("Dropping sample for {:?}: {}", entry.name, err);
            return None;
        }
    };

    Some(Sample::new(metric, merge_tags(&entry.tags, ambient), value))
}

fn sample_for_check(
    check: &CheckEntry,
    checks_metric: &Arc<Metric>,
    ambient: &BTreeMap<String, String>,
) -> Sample {
    let mut tags = check.tags.clone();
    tags.insert(CHECK_TAG.to_string(), check.name.clone());
    let value = if check.passed { 1.0 } else { 0.0 };
    Sample::new(Arc::clone(checks_metric), merge_tags(&tags, ambient), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Registry, SampleBuffer};
    use serde_json::json;

    struct Fixture {
        registry: Registry,
        cache: MetricCache,
        sink: SampleBuffer,
        checks: Arc<Metric>,
        ambient: BTreeMap<String, String>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Registry::new();
            let checks = registry
                .register(CHECKS_METRIC, MetricKind::Rate, ValueType::Default)
                .unwrap();
            Self {
                registry,
                cache: MetricCache::new(),
                sink: SampleBuffer::new(),
                checks,
                ambient: BTreeMap::from([
                    ("vu".to_string(), "1".to_string()),
                    ("scenario".to_string(), "default".to_string()),
                ]),
            }
        }

        fn merge(&self, telemetry: &Telemetry) -> MergeReport {
            merge_telemetry(
                telemetry,
                &self.cache,
                &self.registry,
                &self.checks,
                &self.sink,
                &self.ambient,
            )
        }
    }

    fn entry(kind: MetricKind, name: &str, value: Value) -> TelemetryEntry {
        TelemetryEntry {
            kind,
            name: name.to_string(),
            value,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_kind_is_sticky_to_first_registration() {
        let fixture = Fixture::new();
        let telemetry = Telemetry {
            metrics: vec![
                entry(MetricKind::Counter, "orders", json!(1)),
                entry(MetricKind::Gauge, "orders", json!(5)),
            ],
            checks: vec![],
        };

        let report = fixture.merge(&telemetry);

        assert_eq!(report, MergeReport { samples: 2, dropped: 0 });
        let samples = fixture.sink.for_metric("orders");
        assert_eq!(samples.len(), 2);
        assert!(Arc::ptr_eq(&samples[0].metric, &samples[1].metric));
        assert_eq!(samples[1].metric.kind, MetricKind::Counter);
        assert_eq!(samples[1].value, 5.0);
    }

    #[test]
    fn test_checks_become_rate_samples() {
        let fixture = Fixture::new();
        let telemetry = Telemetry {
            metrics: vec![],
            checks: vec![
                CheckEntry::new("a", true),
                CheckEntry::new("b", false),
                CheckEntry::new("c", true),
            ],
        };

        fixture.merge(&telemetry);

        let samples = fixture.sink.for_metric(CHECKS_METRIC);
        let observed: Vec<_> = samples
            .iter()
            .map(|s| (s.tags[CHECK_TAG].as_str(), s.value))
            .collect();
        assert_eq!(observed, vec![("a", 1.0), ("b", 0.0), ("c", 1.0)]);
        assert!(samples.iter().all(|s| s.metric.kind == MetricKind::Rate));
    }

    #[test]
    fn test_non_numeric_values_are_dropped() {
        let fixture = Fixture::new();
        let telemetry = Telemetry {
            metrics: vec![
                entry(MetricKind::Trend, "latency", json!("fast")),
                entry(MetricKind::Trend, "latency", json!(null)),
                entry(MetricKind::Trend, "latency", json!(0)),
            ],
            checks: vec![],
        };

        let report = fixture.merge(&telemetry);

        assert_eq!(report, MergeReport { samples: 1, dropped: 2 });
        assert_eq!(fixture.sink.for_metric("latency")[0].value, 0.0);
    }

    #[test]
    fn test_ambient_tags_win_over_entry_tags() {
        let fixture = Fixture::new();
        let mut tagged = entry(MetricKind::Counter, "hits", json!(1));
        tagged.tags.insert("vu".to_string(), "999".to_string());
        tagged.tags.insert("route".to_string(), "/cart".to_string());

        fixture.merge(&Telemetry {
            metrics: vec![tagged],
            checks: vec![],
        });

        let sample = &fixture.sink.for_metric("hits")[0];
        assert_eq!(sample.tags["vu"], "1");
        assert_eq!(sample.tags["route"], "/cart");
        assert_eq!(sample.tags["scenario"], "default");
    }

    #[test]
    fn test_registry_conflicts_are_dropped() {
        let fixture = Fixture::new();
        // `checks` is already a rate metric in the registry
        let report = fixture.merge(&Telemetry {
            metrics: vec![
                entry(MetricKind::Counter, CHECKS_METRIC, json!(1)),
                entry(MetricKind::Counter, "bad\nname", json!(1)),
            ],
            checks: vec![],
        });
        assert_eq!(report, MergeReport { samples: 0, dropped: 2 });
        assert!(fixture.cache.is_empty());
    }
}

//! Per-collector metric buffers and their exposition.
//!
//! Each collector writes into its own [`MetricSink`] during a scrape. Sinks of
//! collectors that succeeded are merged and encoded through a fresh
//! `prometheus-client` registry, so a failed collector never leaves partial
//! output behind.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::warn;

/// Label set of one sample.
pub type Labels = Vec<(String, String)>;

/// Exposition type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    /// Monotonic; exposed with a `_total` suffix.
    Counter,
}

#[derive(Debug, Clone)]
struct MetricFamily {
    help: String,
    kind: MetricKind,
    samples: Vec<(Labels, f64)>,
}

/// Metrics produced by one collector in one scrape.
#[derive(Debug, Clone, Default)]
pub struct MetricSink {
    families: BTreeMap<String, MetricFamily>,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a gauge sample.
    pub fn gauge(&mut self, name: &str, help: &str, labels: &[(&str, &str)], value: f64) {
        self.push(name, help, MetricKind::Gauge, labels, value);
    }

    /// Record a counter sample. `name` must not carry the `_total` suffix.
    pub fn counter(&mut self, name: &str, help: &str, labels: &[(&str, &str)], value: f64) {
        self.push(name, help, MetricKind::Counter, labels, value);
    }

    fn push(
        &mut self,
        name: &str,
        help: &str,
        kind: MetricKind,
        labels: &[(&str, &str)],
        value: f64,
    ) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily {
                help: help.to_string(),
                kind,
                samples: Vec::new(),
            });

        if family.kind != kind {
            warn!(metric = name, "Metric recorded with conflicting types, dropping sample");
            return;
        }
        family.samples.push((labels, value));
    }

    /// Move all samples of `other` into this sink.
    pub fn merge(&mut self, other: MetricSink) {
        for (name, family) in other.families {
            match self.families.get_mut(&name) {
                Some(existing) if existing.kind == family.kind => {
                    existing.samples.extend(family.samples);
                }
                Some(_) => {
                    warn!(metric = %name, "Metric family produced with conflicting types, dropping");
                }
                None => {
                    self.families.insert(name, family);
                }
            }
        }
    }

    /// Number of samples recorded.
    pub fn len(&self) -> usize {
        self.families.values().map(|f| f.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Value of the first sample of `name` whose labels include `labels`.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.families.get(name).and_then(|family| {
            family
                .samples
                .iter()
                .find(|(sample_labels, _)| {
                    labels
                        .iter()
                        .all(|(k, v)| sample_labels.iter().any(|(sk, sv)| sk == k && sv == v))
                })
                .map(|(_, value)| *value)
        })
    }

    /// Encode the sink in the OpenMetrics text format with `prefix` on every name.
    pub fn render(self, prefix: &str) -> Result<String, std::fmt::Error> {
        let mut registry = Registry::with_prefix(prefix);

        for (name, family) in self.families {
            // Unlabeled samples go through a plain metric so no empty `{}` is written.
            if family.samples.iter().all(|(labels, _)| labels.is_empty()) {
                let Some((_, value)) = family.samples.last() else {
                    continue;
                };
                if family.samples.len() > 1 {
                    warn!(
                        metric = %name,
                        samples = family.samples.len(),
                        "Unlabeled metric recorded more than once, keeping the last value"
                    );
                }
                match family.kind {
                    MetricKind::Gauge => {
                        let metric = Gauge::<f64, AtomicU64>::default();
                        metric.set(*value);
                        registry.register(name, family.help, metric);
                    }
                    MetricKind::Counter => {
                        let metric = Counter::<f64, AtomicU64>::default();
                        metric.inc_by(*value);
                        registry.register(name, family.help, metric);
                    }
                }
                continue;
            }

            match family.kind {
                MetricKind::Gauge => {
                    let metric = Family::<Labels, Gauge<f64, AtomicU64>>::default();
                    for (labels, value) in &family.samples {
                        metric.get_or_create(labels).set(*value);
                    }
                    registry.register(name, family.help, metric);
                }
                MetricKind::Counter => {
                    let metric = Family::<Labels, Counter<f64, AtomicU64>>::default();
                    for (labels, value) in &family.samples {
                        metric.get_or_create(labels).inc_by(*value);
                    }
                    registry.register(name, family.help, metric);
                }
            }
        }

        let mut body = String::new();
        encode(&mut body, &registry)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_gauge_and_counter() {
        let mut sink = MetricSink::new();
        sink.gauge("memory_available_bytes", "Available memory", &[], 1024.0);
        sink.counter(
            "cpu_time",
            "Time spent in each mode",
            &[("core", "0,0"), ("mode", "idle")],
            12.5,
        );

        let body = sink.render("windows").unwrap();

        assert!(body.contains("# TYPE windows_memory_available_bytes gauge"));
        assert!(body.contains("windows_memory_available_bytes 1024.0"));
        assert!(body.contains("# TYPE windows_cpu_time counter"));
        assert!(body.contains("windows_cpu_time_total{core=\"0,0\",mode=\"idle\"} 12.5"));
        assert!(body.ends_with("# EOF\n"));
    }

    #[test]
    fn test_merge_combines_families() {
        let mut a = MetricSink::new();
        a.gauge("up", "Up", &[("collector", "cpu")], 1.0);
        let mut b = MetricSink::new();
        b.gauge("up", "Up", &[("collector", "memory")], 0.0);

        a.merge(b);

        assert_eq!(a.len(), 2);
        assert_eq!(a.value("up", &[("collector", "memory")]), Some(0.0));
    }

    #[test]
    fn test_conflicting_kind_dropped() {
        let mut sink = MetricSink::new();
        sink.gauge("requests", "Requests", &[], 1.0);
        sink.counter("requests", "Requests", &[], 2.0);

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.value("requests", &[]), Some(1.0));
    }

    #[test]
    fn test_repeated_unlabeled_sample_keeps_last() {
        let mut sink = MetricSink::new();
        sink.gauge("system_threads", "Threads", &[], 10.0);
        sink.gauge("system_threads", "Threads", &[], 20.0);

        let body = sink.render("windows").unwrap();

        assert!(body.contains("windows_system_threads 20.0"));
        assert!(!body.contains("windows_system_threads 10.0"));
        let samples = body
            .lines()
            .filter(|line| line.starts_with("windows_system_threads "))
            .count();
        assert_eq!(samples, 1);
    }

    #[test]
    fn test_empty_render() {
        let body = MetricSink::new().render("windows").unwrap();

        assert_eq!(body, "# EOF\n");
    }
}

//! The collector boundary and the name-keyed collector registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use perfsight_perflib::{CounterObject, PerflibError, Snapshot, UnmarshalError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::sink::MetricSink;

/// Errors raised by collectors.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Perflib(#[from] PerflibError),

    #[error("Collector '{collector}' failed: {reason}")]
    Failed {
        collector: &'static str,
        reason: String,
    },

    #[error("Failed to build collector '{collector}': {reason}")]
    Build { collector: String, reason: String },

    #[error("Unknown collector: {0}")]
    Unknown(String),
}

impl From<UnmarshalError> for CollectorError {
    fn from(e: UnmarshalError) -> Self {
        Self::Perflib(e.into())
    }
}

/// Everything a collector sees of one scrape.
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    pub snapshot: Arc<Snapshot>,
    /// Soft deadline; collectors may stop early once it has passed.
    pub deadline: Instant,
}

impl ScrapeContext {
    pub fn new(snapshot: Arc<Snapshot>, deadline: Instant) -> Self {
        Self { snapshot, deadline }
    }

    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Look up an object, failing the collector when it is absent.
    pub fn object(&self, name: &str) -> Result<&CounterObject, CollectorError> {
        Ok(self.snapshot.object(name)?)
    }
}

/// A source of metrics over one or more performance objects.
///
/// Collectors are built once at startup, then shared read-only across
/// concurrent scrapes.
pub trait Collector: Send + Sync {
    /// Name used for selection and in meta metrics.
    fn name(&self) -> &'static str;

    /// Performance objects this collector reads from the snapshot.
    fn perf_counters(&self) -> &'static [&'static str];

    /// One-time setup before the first scrape.
    fn build(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Emit metrics for one scrape into `sink`.
    fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError>;

    /// Release resources at shutdown.
    fn close(&self) -> Result<(), CollectorError> {
        Ok(())
    }
}

/// Creates a collector by name.
pub type CollectorFactory = fn(&str) -> Option<Box<dyn Collector>>;

/// Built collectors keyed by name.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<&'static str, Box<dyn Collector>>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.collectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate and build every enabled collector.
    ///
    /// A name the factory does not know is a configuration error. A collector
    /// whose `build` fails is logged and left out; the others still run.
    pub fn build(enabled: &[String], factory: CollectorFactory) -> Result<Self, CollectorError> {
        let mut registry = Self::new();

        for name in enabled {
            let mut collector =
                factory(name).ok_or_else(|| CollectorError::Unknown(name.clone()))?;

            let started = Instant::now();
            match collector.build() {
                Ok(()) => {
                    debug!(
                        collector = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Built collector"
                    );
                    registry.register(collector);
                }
                Err(e) => {
                    error!(collector = %name, error = %e, "Failed to build collector, disabling it");
                }
            }
        }

        info!(
            collectors = ?registry.names().collect::<Vec<_>>(),
            "Collectors enabled"
        );
        Ok(registry)
    }

    /// Add an already-built collector, replacing one of the same name.
    pub fn register(&mut self, collector: Box<dyn Collector>) {
        if self.collectors.insert(collector.name(), collector).is_some() {
            warn!("Replaced a collector registered twice");
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Collector> {
        self.collectors.get(name).map(|c| c.as_ref())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.collectors.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Union of the performance objects needed by `selected`, first-seen order.
    pub fn perf_counters(&self, selected: &[&'static str]) -> Vec<&'static str> {
        let mut objects = Vec::new();
        for collector in selected.iter().filter_map(|name| self.get(name)) {
            for object in collector.perf_counters() {
                if !objects.contains(object) {
                    objects.push(*object);
                }
            }
        }
        objects
    }

    /// Close every collector. Failures are logged.
    pub fn close_all(&self) {
        for (name, collector) in &self.collectors {
            if let Err(e) = collector.close() {
                warn!(collector = *name, error = %e, "Failed to close collector");
            }
        }
    }
}

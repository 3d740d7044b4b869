//! Scrape orchestration.
//!
//! One scrape takes a single performance snapshot covering every selected
//! collector, hands it to each collector in turn, and merges the output of the
//! ones that succeeded:
//!
//! ```text
//! request ─> admit ─> snapshot ─> dispatch ─> aggregate ─> response
//!              │                      │
//!           rejected           per-collector sinks,
//!           when full          failures discarded
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use perfsight_perflib::{Perflib, Snapshot};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};

use crate::collector::{CollectorRegistry, ScrapeContext};
use crate::config::ScrapeConfig;
use crate::sink::MetricSink;

/// Upper bound on any scrape budget, whatever the client asks for.
pub const MAX_SCRAPE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Budget for `secs` seconds, capped at [`MAX_SCRAPE_TIMEOUT`].
fn budget(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_SCRAPE_TIMEOUT)
        .min(MAX_SCRAPE_TIMEOUT)
}

/// Scrape-level failures. Individual collector failures are not among them.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Too many concurrent scrapes (limit {limit})")]
    TooManyRequests { limit: usize },

    #[error("Unknown collector: {0}")]
    UnknownCollector(String),

    #[error("No collectors available")]
    NoCollectors,

    #[error("Failed to encode metrics: {0}")]
    Render(#[from] std::fmt::Error),

    #[error("Scrape task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Bounds the number of scrapes in flight. Excess requests are rejected, not queued.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Take a slot if one is free. The slot is released when the permit drops.
    pub fn try_admit(&self) -> Result<OwnedSemaphorePermit, ScrapeError> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ScrapeError::TooManyRequests { limit: self.limit })
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Parameters of one inbound scrape.
#[derive(Debug, Clone, Default)]
pub struct ScrapeRequest {
    /// Collectors to run; `None` or empty runs all of them.
    pub collectors: Option<Vec<String>>,
    /// Client timeout in seconds, if it sent one.
    pub timeout_hint: Option<f64>,
}

/// Result of one scrape.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    /// Encoded metrics.
    pub body: String,
    pub succeeded: Vec<&'static str>,
    pub failed: Vec<&'static str>,
    /// Skipped because the deadline passed before they could start.
    pub timed_out: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorStatus {
    Success,
    Failed,
    TimedOut,
}

#[derive(Debug)]
struct CollectorRun {
    name: &'static str,
    status: CollectorStatus,
    duration: Duration,
    sink: Option<MetricSink>,
}

/// Drives snapshot, dispatch and aggregation for each request.
#[derive(Debug)]
pub struct Scraper {
    registry: Arc<CollectorRegistry>,
    perflib: Perflib,
    limiter: ConcurrencyLimiter,
    timeout_margin: f64,
    default_timeout: Duration,
    prefix: String,
}

impl Scraper {
    pub fn new(
        registry: Arc<CollectorRegistry>,
        perflib: Perflib,
        config: &ScrapeConfig,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            perflib,
            limiter: ConcurrencyLimiter::new(config.max_requests),
            timeout_margin: config.timeout_margin_secs,
            default_timeout: budget(config.default_timeout_secs),
            prefix: prefix.into(),
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn registry(&self) -> &Arc<CollectorRegistry> {
        &self.registry
    }

    /// Scrape budget for a client timeout hint.
    ///
    /// The margin is only subtracted when the hint exceeds it. Missing,
    /// non-positive or non-finite hints fall back to the configured default.
    /// The result never exceeds [`MAX_SCRAPE_TIMEOUT`].
    pub fn timeout(&self, hint: Option<f64>) -> Duration {
        match hint {
            Some(hint) if hint.is_finite() && hint > 0.0 => {
                if hint > self.timeout_margin {
                    budget(hint - self.timeout_margin)
                } else {
                    budget(hint)
                }
            }
            _ => self.default_timeout,
        }
    }

    /// Resolve the requested collectors against the registry.
    pub fn select(&self, requested: Option<&[String]>) -> Result<Vec<&'static str>, ScrapeError> {
        if self.registry.is_empty() {
            return Err(ScrapeError::NoCollectors);
        }

        match requested {
            Some(names) if !names.is_empty() => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    let collector = self
                        .registry
                        .get(name)
                        .ok_or_else(|| ScrapeError::UnknownCollector(name.clone()))?;
                    if !selected.contains(&collector.name()) {
                        selected.push(collector.name());
                    }
                }
                Ok(selected)
            }
            _ => Ok(self.registry.names().collect()),
        }
    }

    /// Run one scrape, or reject it when all slots are taken.
    pub async fn scrape(&self, request: ScrapeRequest) -> Result<ScrapeOutcome, ScrapeError> {
        let _permit = match self.limiter.try_admit() {
            Ok(permit) => permit,
            Err(e) => {
                warn!(limit = self.limiter.limit(), "Rejecting scrape, too many in flight");
                return Err(e);
            }
        };
        debug!(available = self.limiter.available(), "Scrape admitted");

        self.run(request).await
    }

    async fn run(&self, request: ScrapeRequest) -> Result<ScrapeOutcome, ScrapeError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.timeout(request.timeout_hint))
            .or_else(|| started.checked_add(self.default_timeout))
            .unwrap_or(started);
        let selected = self.select(request.collectors.as_deref())?;

        debug!(collectors = ?selected, "Taking snapshot");
        let objects = self.registry.perf_counters(&selected);
        let perflib = self.perflib.clone();
        let snapshot_started = Instant::now();
        let snapshot =
            tokio::task::spawn_blocking(move || perflib.snapshot(objects.as_slice())).await?;
        let snapshot_duration = snapshot_started.elapsed();

        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to take performance snapshot, continuing with empty snapshot");
                Snapshot::empty()
            }
        };

        debug!(objects = snapshot.len(), "Dispatching to collectors");
        let ctx = ScrapeContext::new(Arc::new(snapshot), deadline);
        let registry = self.registry.clone();
        let runs =
            tokio::task::spawn_blocking(move || dispatch(&registry, &selected, &ctx)).await?;

        debug!("Aggregating collector output");
        let outcome = self.aggregate(runs, snapshot_duration)?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            timed_out = outcome.timed_out.len(),
            "Scrape complete"
        );
        Ok(outcome)
    }

    fn aggregate(
        &self,
        runs: Vec<CollectorRun>,
        snapshot_duration: Duration,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let mut merged = MetricSink::new();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut timed_out = Vec::new();

        for run in runs {
            let labels = [("collector", run.name)];
            merged.gauge(
                "exporter_collector_success",
                "Whether the collector was successful",
                &labels,
                if run.status == CollectorStatus::Success { 1.0 } else { 0.0 },
            );
            merged.gauge(
                "exporter_collector_duration_seconds",
                "Duration of a collection",
                &labels,
                run.duration.as_secs_f64(),
            );
            merged.gauge(
                "exporter_collector_timeout",
                "Whether the collector timed out",
                &labels,
                if run.status == CollectorStatus::TimedOut { 1.0 } else { 0.0 },
            );

            match run.status {
                CollectorStatus::Success => succeeded.push(run.name),
                CollectorStatus::Failed => failed.push(run.name),
                CollectorStatus::TimedOut => timed_out.push(run.name),
            }
            if let Some(sink) = run.sink {
                merged.merge(sink);
            }
        }

        merged.gauge(
            "exporter_perflib_snapshot_duration_seconds",
            "Duration of the performance data snapshot",
            &[],
            snapshot_duration.as_secs_f64(),
        );

        Ok(ScrapeOutcome {
            body: merged.render(&self.prefix)?,
            succeeded,
            failed,
            timed_out,
        })
    }
}

/// Run collectors one after another against the shared snapshot.
fn dispatch(
    registry: &CollectorRegistry,
    selected: &[&'static str],
    ctx: &ScrapeContext,
) -> Vec<CollectorRun> {
    selected
        .iter()
        .filter_map(|name| registry.get(name))
        .map(|collector| {
            let name = collector.name();
            if ctx.deadline_exceeded() {
                warn!(collector = name, "Deadline passed, skipping collector");
                return CollectorRun {
                    name,
                    status: CollectorStatus::TimedOut,
                    duration: Duration::ZERO,
                    sink: None,
                };
            }

            let started = Instant::now();
            let mut sink = MetricSink::new();
            let result = catch_unwind(AssertUnwindSafe(|| collector.collect(ctx, &mut sink)));
            let duration = started.elapsed();

            match result {
                Ok(Ok(())) => {
                    debug!(
                        collector = name,
                        samples = sink.len(),
                        duration_ms = duration.as_millis() as u64,
                        "Collector succeeded"
                    );
                    CollectorRun {
                        name,
                        status: CollectorStatus::Success,
                        duration,
                        sink: Some(sink),
                    }
                }
                Ok(Err(e)) => {
                    error!(collector = name, error = %e, "Collector failed");
                    CollectorRun {
                        name,
                        status: CollectorStatus::Failed,
                        duration,
                        sink: None,
                    }
                }
                Err(_) => {
                    error!(collector = name, "Collector panicked");
                    CollectorRun {
                        name,
                        status: CollectorStatus::Failed,
                        duration,
                        sink: None,
                    }
                }
            }
        })
        .collect()
}

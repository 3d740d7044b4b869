//! System-wide memory metrics from the "Memory" object.

use perfsight_perflib::{Binding, PerfRecord, unmarshal};

use crate::collector::{Collector, CollectorError, ScrapeContext};
use crate::sink::MetricSink;

const OBJECT: &str = "Memory";

#[derive(Debug, Default)]
struct Memory {
    available_bytes: f64,
    cache_bytes: f64,
    committed_bytes: f64,
    commit_limit: f64,
    page_faults: f64,
    pool_nonpaged_bytes: f64,
}

impl PerfRecord for Memory {
    const BINDINGS: &'static [Binding<Self>] = &[
        Binding::new("Available Bytes", |r: &mut Self, v| r.available_bytes = v),
        Binding::new("Cache Bytes", |r: &mut Self, v| r.cache_bytes = v),
        Binding::new("Committed Bytes", |r: &mut Self, v| r.committed_bytes = v),
        Binding::new("Commit Limit", |r: &mut Self, v| r.commit_limit = v),
        Binding::new("Page Faults/sec", |r: &mut Self, v| r.page_faults = v),
        Binding::new("Pool Nonpaged Bytes", |r: &mut Self, v| r.pool_nonpaged_bytes = v),
    ];
}

#[derive(Debug, Default)]
pub struct MemoryCollector;

impl Collector for MemoryCollector {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn perf_counters(&self) -> &'static [&'static str] {
        &[OBJECT]
    }

    fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError> {
        let records: Vec<Memory> = unmarshal(ctx.object(OBJECT)?)?;
        let memory = records.first().ok_or_else(|| CollectorError::Failed {
            collector: "memory",
            reason: "Memory object has no instance".to_string(),
        })?;

        sink.gauge(
            "memory_available_bytes",
            "Physical memory immediately available for allocation",
            &[],
            memory.available_bytes,
        );
        sink.gauge(
            "memory_cache_bytes",
            "Size of the file system cache",
            &[],
            memory.cache_bytes,
        );
        sink.gauge(
            "memory_committed_bytes",
            "Committed virtual memory",
            &[],
            memory.committed_bytes,
        );
        sink.gauge(
            "memory_commit_limit",
            "Virtual memory that can be committed without extending the paging files",
            &[],
            memory.commit_limit,
        );
        sink.counter(
            "memory_page_faults",
            "Page faults, hard and soft",
            &[],
            memory.page_faults,
        );
        sink.gauge(
            "memory_pool_nonpaged_bytes",
            "Size of the nonpaged pool",
            &[],
            memory.pool_nonpaged_bytes,
        );
        Ok(())
    }
}

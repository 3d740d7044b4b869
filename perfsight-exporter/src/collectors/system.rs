//! Kernel-wide metrics from the "System" object.

use perfsight_perflib::{Binding, PerfRecord, unmarshal};

use crate::collector::{Collector, CollectorError, ScrapeContext};
use crate::sink::MetricSink;

const OBJECT: &str = "System";

#[derive(Debug, Default)]
struct System {
    context_switches: f64,
    exception_dispatches: f64,
    processor_queue_length: f64,
    system_calls: f64,
    /// Boot time as a Unix timestamp.
    system_up_time: f64,
    processes: f64,
    threads: f64,
}

impl PerfRecord for System {
    const BINDINGS: &'static [Binding<Self>] = &[
        Binding::new("Context Switches/sec", |r: &mut Self, v| r.context_switches = v),
        Binding::new("Exception Dispatches/sec", |r: &mut Self, v| {
            r.exception_dispatches = v
        }),
        Binding::new("Processor Queue Length", |r: &mut Self, v| {
            r.processor_queue_length = v
        }),
        Binding::new("System Calls/sec", |r: &mut Self, v| r.system_calls = v),
        Binding::new("System Up Time", |r: &mut Self, v| r.system_up_time = v),
        Binding::new("Processes", |r: &mut Self, v| r.processes = v),
        Binding::new("Threads", |r: &mut Self, v| r.threads = v),
    ];
}

#[derive(Debug, Default)]
pub struct SystemCollector;

impl Collector for SystemCollector {
    fn name(&self) -> &'static str {
        "system"
    }

    fn perf_counters(&self) -> &'static [&'static str] {
        &[OBJECT]
    }

    fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError> {
        let records: Vec<System> = unmarshal(ctx.object(OBJECT)?)?;
        let system = records.first().ok_or_else(|| CollectorError::Failed {
            collector: "system",
            reason: "System object has no instance".to_string(),
        })?;

        sink.counter(
            "system_context_switches",
            "Context switches between threads",
            &[],
            system.context_switches,
        );
        sink.counter(
            "system_exception_dispatches",
            "Exceptions dispatched by the system",
            &[],
            system.exception_dispatches,
        );
        sink.gauge(
            "system_processor_queue_length",
            "Threads in the processor ready queue",
            &[],
            system.processor_queue_length,
        );
        sink.counter(
            "system_system_calls",
            "System service calls",
            &[],
            system.system_calls,
        );
        sink.gauge(
            "system_boot_time_timestamp_seconds",
            "Unix timestamp of the last system boot",
            &[],
            system.system_up_time,
        );
        sink.gauge(
            "system_processes",
            "Processes loaded on the computer",
            &[],
            system.processes,
        );
        sink.gauge(
            "system_threads",
            "Threads on the computer",
            &[],
            system.threads,
        );
        Ok(())
    }
}

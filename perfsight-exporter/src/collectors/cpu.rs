//! Per-core processor metrics from the "Processor Information" object.

use perfsight_perflib::{Binding, PerfRecord, unmarshal};
use tracing::trace;

use crate::collector::{Collector, CollectorError, ScrapeContext};
use crate::sink::MetricSink;

const OBJECT: &str = "Processor Information";

#[derive(Debug, Default)]
struct ProcessorInformation {
    name: String,
    idle_time: f64,
    interrupt_time: f64,
    dpc_time: f64,
    privileged_time: f64,
    user_time: f64,
    interrupts: f64,
    dpcs_queued: f64,
    processor_performance: f64,
    processor_mperf: f64,
}

impl PerfRecord for ProcessorInformation {
    const BINDINGS: &'static [Binding<Self>] = &[
        Binding::new("% Idle Time", |r: &mut Self, v| r.idle_time = v),
        Binding::new("% Interrupt Time", |r: &mut Self, v| r.interrupt_time = v),
        Binding::new("% DPC Time", |r: &mut Self, v| r.dpc_time = v),
        Binding::new("% Privileged Time", |r: &mut Self, v| r.privileged_time = v),
        Binding::new("% User Time", |r: &mut Self, v| r.user_time = v),
        Binding::new("Interrupts/sec", |r: &mut Self, v| r.interrupts = v),
        Binding::new("DPCs Queued/sec", |r: &mut Self, v| r.dpcs_queued = v),
        Binding::new("% Processor Performance", |r: &mut Self, v| {
            r.processor_performance = v
        }),
        Binding::new("% Processor Performance,secondvalue", |r: &mut Self, v| {
            r.processor_mperf = v
        }),
    ];

    fn set_instance_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// Processor time by mode, interrupts and frequency counters per logical core.
#[derive(Debug, Default)]
pub struct CpuCollector;

impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn perf_counters(&self) -> &'static [&'static str] {
        &[OBJECT]
    }

    fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError> {
        let records: Vec<ProcessorInformation> = unmarshal(ctx.object(OBJECT)?)?;

        let mut cores = 0;
        for cpu in &records {
            if cpu.name.to_lowercase().contains("_total") {
                trace!(instance = %cpu.name, "Skipping aggregate processor instance");
                continue;
            }
            cores += 1;

            let core = cpu.name.as_str();
            for (mode, seconds) in [
                ("idle", cpu.idle_time),
                ("interrupt", cpu.interrupt_time),
                ("dpc", cpu.dpc_time),
                ("privileged", cpu.privileged_time),
                ("user", cpu.user_time),
            ] {
                sink.counter(
                    "cpu_time",
                    "Time that processor spent in different modes (dpc, idle, interrupt, privileged, user)",
                    &[("core", core), ("mode", mode)],
                    seconds,
                );
            }

            sink.counter(
                "cpu_interrupts",
                "Total number of received and serviced hardware interrupts",
                &[("core", core)],
                cpu.interrupts,
            );
            sink.counter(
                "cpu_dpcs",
                "Total number of received and serviced deferred procedure calls (DPCs)",
                &[("core", core)],
                cpu.dpcs_queued,
            );
            sink.counter(
                "cpu_processor_performance",
                "Processor performance relative to nominal frequency",
                &[("core", core)],
                cpu.processor_performance,
            );
            sink.counter(
                "cpu_processor_mperf",
                "Processor maximum-frequency reference counter",
                &[("core", core)],
                cpu.processor_mperf,
            );
        }

        sink.gauge(
            "cpu_logical_processor",
            "Total number of logical processors",
            &[],
            cores as f64,
        );
        Ok(())
    }
}

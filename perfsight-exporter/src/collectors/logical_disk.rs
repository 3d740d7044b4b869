//! Per-volume metrics from the "LogicalDisk" object.

use perfsight_perflib::{Binding, PerfRecord, unmarshal};

use crate::collector::{Collector, CollectorError, ScrapeContext};
use crate::sink::MetricSink;

const OBJECT: &str = "LogicalDisk";

/// Free space is reported in MiB.
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Default)]
struct LogicalDisk {
    name: String,
    free_space: f64,
    total_space: f64,
    current_disk_queue_length: f64,
    disk_read_bytes: f64,
    disk_write_bytes: f64,
    disk_reads: f64,
    disk_writes: f64,
    idle_time: f64,
}

impl PerfRecord for LogicalDisk {
    const BINDINGS: &'static [Binding<Self>] = &[
        Binding::new("% Free Space", |r: &mut Self, v| r.free_space = v),
        Binding::new("% Free Space_Base", |r: &mut Self, v| r.total_space = v),
        Binding::new("Current Disk Queue Length", |r: &mut Self, v| {
            r.current_disk_queue_length = v
        }),
        Binding::new("Disk Read Bytes/sec", |r: &mut Self, v| r.disk_read_bytes = v),
        Binding::new("Disk Write Bytes/sec", |r: &mut Self, v| r.disk_write_bytes = v),
        Binding::new("Disk Reads/sec", |r: &mut Self, v| r.disk_reads = v),
        Binding::new("Disk Writes/sec", |r: &mut Self, v| r.disk_writes = v),
        Binding::new("% Idle Time", |r: &mut Self, v| r.idle_time = v),
    ];

    fn set_instance_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// Volume size, free space and I/O counters.
#[derive(Debug, Default)]
pub struct LogicalDiskCollector;

impl Collector for LogicalDiskCollector {
    fn name(&self) -> &'static str {
        "logical_disk"
    }

    fn perf_counters(&self) -> &'static [&'static str] {
        &[OBJECT]
    }

    fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError> {
        let volumes: Vec<LogicalDisk> = unmarshal(ctx.object(OBJECT)?)?;

        for volume in volumes.iter().filter(|v| v.name != "_Total") {
            let labels = [("volume", volume.name.as_str())];

            sink.gauge(
                "logical_disk_size_bytes",
                "Total space in bytes",
                &labels,
                volume.total_space * MIB,
            );
            sink.gauge(
                "logical_disk_free_bytes",
                "Free space in bytes",
                &labels,
                volume.free_space * MIB,
            );
            sink.gauge(
                "logical_disk_requests_queued",
                "Requests outstanding on the disk at the time of collection",
                &labels,
                volume.current_disk_queue_length,
            );
            sink.counter(
                "logical_disk_read_bytes",
                "Bytes transferred from the disk during read operations",
                &labels,
                volume.disk_read_bytes,
            );
            sink.counter(
                "logical_disk_write_bytes",
                "Bytes transferred to the disk during write operations",
                &labels,
                volume.disk_write_bytes,
            );
            sink.counter(
                "logical_disk_reads",
                "Read operations on the disk",
                &labels,
                volume.disk_reads,
            );
            sink.counter(
                "logical_disk_writes",
                "Write operations on the disk",
                &labels,
                volume.disk_writes,
            );
            sink.counter(
                "logical_disk_idle_seconds",
                "Seconds that the disk was idle",
                &labels,
                volume.idle_time,
            );
        }
        Ok(())
    }
}

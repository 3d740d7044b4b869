//! Synthetic performance data.
//!
//! [`DemoReader`] serves encoded blocks for the objects the bundled collectors
//! read, with values that grow with uptime, so the exporter can run on any
//! platform.

use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use perfsight_perflib::counter_type::WINDOWS_EPOCH;
use perfsight_perflib::{
    BlockBuilder, CounterType, NameIndexTable, ObjectBuilder, Query, RawSnapshotReader,
};
use tracing::trace;

pub const SYSTEM: u32 = 2;
pub const MEMORY: u32 = 4;
pub const LOGICAL_DISK: u32 = 236;
pub const PROCESSOR_INFORMATION: u32 = 1848;

const IDLE_TIME: u32 = 10;
const INTERRUPT_TIME: u32 = 12;
const DPC_TIME: u32 = 14;
const PRIVILEGED_TIME: u32 = 16;
const USER_TIME: u32 = 18;
const INTERRUPTS: u32 = 20;
const DPCS_QUEUED: u32 = 22;
const PROCESSOR_PERFORMANCE: u32 = 24;
const AVAILABLE_BYTES: u32 = 26;
const CACHE_BYTES: u32 = 28;
const COMMITTED_BYTES: u32 = 30;
const COMMIT_LIMIT: u32 = 32;
const PAGE_FAULTS: u32 = 34;
const POOL_NONPAGED_BYTES: u32 = 36;
const FREE_SPACE: u32 = 38;
const CURRENT_DISK_QUEUE_LENGTH: u32 = 40;
const DISK_READ_BYTES: u32 = 42;
const DISK_WRITE_BYTES: u32 = 44;
const DISK_READS: u32 = 46;
const DISK_WRITES: u32 = 48;
const CONTEXT_SWITCHES: u32 = 50;
const EXCEPTION_DISPATCHES: u32 = 52;
const PROCESSOR_QUEUE_LENGTH: u32 = 54;
const SYSTEM_CALLS: u32 = 56;
const SYSTEM_UP_TIME: u32 = 58;
const PROCESSES: u32 = 60;
const THREADS: u32 = 62;

const NAMES: &[(u32, &str)] = &[
    (SYSTEM, "System"),
    (MEMORY, "Memory"),
    (LOGICAL_DISK, "LogicalDisk"),
    (PROCESSOR_INFORMATION, "Processor Information"),
    (IDLE_TIME, "% Idle Time"),
    (INTERRUPT_TIME, "% Interrupt Time"),
    (DPC_TIME, "% DPC Time"),
    (PRIVILEGED_TIME, "% Privileged Time"),
    (USER_TIME, "% User Time"),
    (INTERRUPTS, "Interrupts/sec"),
    (DPCS_QUEUED, "DPCs Queued/sec"),
    (PROCESSOR_PERFORMANCE, "% Processor Performance"),
    (AVAILABLE_BYTES, "Available Bytes"),
    (CACHE_BYTES, "Cache Bytes"),
    (COMMITTED_BYTES, "Committed Bytes"),
    (COMMIT_LIMIT, "Commit Limit"),
    (PAGE_FAULTS, "Page Faults/sec"),
    (POOL_NONPAGED_BYTES, "Pool Nonpaged Bytes"),
    (FREE_SPACE, "% Free Space"),
    (CURRENT_DISK_QUEUE_LENGTH, "Current Disk Queue Length"),
    (DISK_READ_BYTES, "Disk Read Bytes/sec"),
    (DISK_WRITE_BYTES, "Disk Write Bytes/sec"),
    (DISK_READS, "Disk Reads/sec"),
    (DISK_WRITES, "Disk Writes/sec"),
    (CONTEXT_SWITCHES, "Context Switches/sec"),
    (EXCEPTION_DISPATCHES, "Exception Dispatches/sec"),
    (PROCESSOR_QUEUE_LENGTH, "Processor Queue Length"),
    (SYSTEM_CALLS, "System Calls/sec"),
    (SYSTEM_UP_TIME, "System Up Time"),
    (PROCESSES, "Processes"),
    (THREADS, "Threads"),
];

const HELP: &[(u32, &str)] = &[
    (SYSTEM + 1, "Counters that apply to more than one processor on the computer."),
    (MEMORY + 1, "Physical and virtual memory on the computer."),
    (LOGICAL_DISK + 1, "Partitions of a hard or fixed disk drive."),
    (PROCESSOR_INFORMATION + 1, "Measures aspects of processor activity."),
];

/// Volumes served by the demo source: name, size and free space in MiB.
const VOLUMES: &[(&str, i64, i64)] = &[("C:", 487_000, 212_000), ("D:", 953_000, 801_000)];

const TICKS_PER_SECOND: f64 = 10_000_000.0;

/// The demo counter name table.
pub fn name_table() -> NameIndexTable {
    NameIndexTable::from_pairs(NAMES.iter().copied())
}

/// A reader producing synthetic blocks.
#[derive(Debug, Clone)]
pub struct DemoReader {
    started: Instant,
    boot_time: DateTime<Utc>,
    cores: usize,
}

impl Default for DemoReader {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DemoReader {
    pub fn new(cores: usize) -> Self {
        Self {
            started: Instant::now(),
            boot_time: Utc::now() - ChronoDuration::days(1),
            cores: cores.max(1),
        }
    }

    pub fn boot_time(&self) -> DateTime<Utc> {
        self.boot_time
    }

    fn processor_information(&self, t: f64) -> ObjectBuilder {
        let mut object = ObjectBuilder::new(PROCESSOR_INFORMATION)
            .counter(IDLE_TIME, CounterType::TIMER_100NS)
            .counter(INTERRUPT_TIME, CounterType::TIMER_100NS)
            .counter(DPC_TIME, CounterType::TIMER_100NS)
            .counter(PRIVILEGED_TIME, CounterType::TIMER_100NS)
            .counter(USER_TIME, CounterType::TIMER_100NS)
            .counter(INTERRUPTS, CounterType::COUNTER)
            .counter(DPCS_QUEUED, CounterType::COUNTER)
            .counter(PROCESSOR_PERFORMANCE, CounterType::AVERAGE_BULK);

        let mut total = [0i64; 8];
        for core in 0..self.cores {
            let busy = 0.1 + 0.05 * (core % 8) as f64;
            let ticks = |share: f64| (t * share * TICKS_PER_SECOND) as i64;
            let values = [
                ticks(1.0 - busy),
                ticks(busy * 0.03),
                ticks(busy * 0.02),
                ticks(busy * 0.25),
                ticks(busy * 0.70),
                (t * 800.0) as i64,
                (t * 50.0) as i64,
                (t * 95_000.0) as i64,
            ];
            for (sum, value) in total.iter_mut().zip(values) {
                *sum += value;
            }
            object = object.instance_with_second(
                &format!("0,{}", core),
                &with_second(&values, 7, (t * 100_000.0) as i64),
            );
        }

        object
            .instance_with_second(
                "0,_Total",
                &with_second(&total, 7, (t * 100_000.0) as i64 * self.cores as i64),
            )
            .instance_with_second(
                "_Total",
                &with_second(&total, 7, (t * 100_000.0) as i64 * self.cores as i64),
            )
    }

    fn memory(&self, t: f64) -> ObjectBuilder {
        const GIB: i64 = 1 << 30;
        let wobble = ((t as i64) % 256) << 20;

        ObjectBuilder::new(MEMORY)
            .counter(AVAILABLE_BYTES, CounterType::LARGE_RAWCOUNT)
            .counter(CACHE_BYTES, CounterType::LARGE_RAWCOUNT)
            .counter(COMMITTED_BYTES, CounterType::LARGE_RAWCOUNT)
            .counter(COMMIT_LIMIT, CounterType::LARGE_RAWCOUNT)
            .counter(PAGE_FAULTS, CounterType::COUNTER)
            .counter(POOL_NONPAGED_BYTES, CounterType::RAWCOUNT)
            .single(&[
                6 * GIB - wobble,
                GIB + wobble,
                10 * GIB + wobble,
                24 * GIB,
                (t * 1_200.0) as i64,
                350 << 20,
            ])
    }

    fn logical_disk(&self, t: f64) -> ObjectBuilder {
        let mut object = ObjectBuilder::new(LOGICAL_DISK)
            .counter(FREE_SPACE, CounterType::RAW_FRACTION)
            .counter(FREE_SPACE, CounterType::RAW_BASE)
            .counter(CURRENT_DISK_QUEUE_LENGTH, CounterType::RAWCOUNT)
            .counter(DISK_READ_BYTES, CounterType::BULK_COUNT)
            .counter(DISK_WRITE_BYTES, CounterType::BULK_COUNT)
            .counter(DISK_READS, CounterType::COUNTER)
            .counter(DISK_WRITES, CounterType::COUNTER)
            .counter(IDLE_TIME, CounterType::PRECISION_100NS_TIMER);

        let mut total = [0i64; 8];
        for (i, (name, size, free)) in VOLUMES.iter().enumerate() {
            let scale = (i + 1) as f64;
            let values = [
                *free,
                *size,
                (i % 2) as i64,
                (t * 2_000_000.0 * scale) as i64,
                (t * 750_000.0 * scale) as i64,
                (t * 40.0 * scale) as i64,
                (t * 15.0 * scale) as i64,
                (t * 0.97 * TICKS_PER_SECOND) as i64,
            ];
            for (sum, value) in total.iter_mut().zip(values) {
                *sum += value;
            }
            object = object.instance(name, &values);
        }

        object.instance("_Total", &total)
    }

    fn system(&self, t: f64) -> ObjectBuilder {
        let boot = WINDOWS_EPOCH + self.boot_time.timestamp_micros() * 10;

        ObjectBuilder::new(SYSTEM)
            .frequency(TICKS_PER_SECOND as i64)
            .counter(CONTEXT_SWITCHES, CounterType::COUNTER)
            .counter(EXCEPTION_DISPATCHES, CounterType::COUNTER)
            .counter(PROCESSOR_QUEUE_LENGTH, CounterType::RAWCOUNT)
            .counter(SYSTEM_CALLS, CounterType::COUNTER)
            .counter(SYSTEM_UP_TIME, CounterType::ELAPSED_TIME)
            .counter(PROCESSES, CounterType::RAWCOUNT)
            .counter(THREADS, CounterType::RAWCOUNT)
            .single(&[
                (t * 12_000.0) as i64,
                (t * 3.0) as i64,
                (t as i64) % 3,
                (t * 45_000.0) as i64,
                boot,
                180,
                2_400,
            ])
    }
}

fn with_second(values: &[i64], second_at: usize, second: i64) -> Vec<(i64, Option<i64>)> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, (i == second_at).then_some(second)))
        .collect()
}

impl RawSnapshotReader for DemoReader {
    fn fetch(&self, query: &Query) -> perfsight_perflib::Result<Vec<u8>> {
        let t = self.started.elapsed().as_secs_f64() + 1.0;
        let now = Utc::now();
        let requested = match query {
            Query::Global => vec![PROCESSOR_INFORMATION, MEMORY, LOGICAL_DISK, SYSTEM],
            Query::Costly => Vec::new(),
            Query::Indices(indices) => indices.clone(),
        };

        let mut block = BlockBuilder::new("DEMO")
            .system_time(now)
            .perf_time((t * TICKS_PER_SECOND) as i64, TICKS_PER_SECOND as i64);

        for index in requested {
            block = match index {
                PROCESSOR_INFORMATION => block.object(self.processor_information(t)),
                MEMORY => block.object(self.memory(t)),
                LOGICAL_DISK => block.object(self.logical_disk(t)),
                SYSTEM => block.object(self.system(t)),
                other => {
                    trace!(index = other, "Object not provided by demo source");
                    block
                }
            };
        }

        Ok(block.build())
    }

    fn name_table(&self) -> perfsight_perflib::Result<NameIndexTable> {
        Ok(name_table())
    }

    fn help_table(&self) -> perfsight_perflib::Result<NameIndexTable> {
        Ok(NameIndexTable::from_pairs(HELP.iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfsight_perflib::parse_block;

    #[test]
    fn test_global_block_decodes() {
        let reader = DemoReader::new(2);
        let data = reader.fetch(&Query::Global).unwrap();

        let block = parse_block(&data, &name_table(), None).unwrap();
        let names: Vec<_> = block.objects.iter().map(|o| o.name.as_str()).collect();

        assert_eq!(
            names,
            vec!["Processor Information", "Memory", "LogicalDisk", "System"]
        );
        assert!(block.errors.is_empty());
        assert_eq!(block.header.system_name, "DEMO");

        let cpu = &block.objects[0];
        assert_eq!(cpu.instances.len(), 4);
        assert_eq!(cpu.instances[0].name, "0,0");
        assert_eq!(cpu.instances[3].name, "_Total");
    }

    #[test]
    fn test_index_query_selects_objects() {
        let reader = DemoReader::default();
        let data = reader
            .fetch(&Query::Indices(vec![MEMORY, 9999]))
            .unwrap();

        let block = parse_block(&data, &name_table(), None).unwrap();

        assert_eq!(block.objects.len(), 1);
        assert_eq!(block.objects[0].name, "Memory");
    }

    #[test]
    fn test_costly_query_is_empty() {
        let data = DemoReader::default().fetch(&Query::Costly).unwrap();
        let block = parse_block(&data, &name_table(), None).unwrap();

        assert!(block.objects.is_empty());
    }
}

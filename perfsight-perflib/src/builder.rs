//! Encoder for well-formed performance data blocks.
//!
//! Produces the same layout the decoder reads. Used to feed the decoder
//! without a live system, by tests and by the exporter's demo mode.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::counter_type::{CounterType, WINDOWS_EPOCH};
use crate::parser::{
    COUNTER_DEFINITION_SIZE, DATA_BLOCK_SIZE, INSTANCE_DEFINITION_SIZE, OBJECT_TYPE_SIZE, SIGNATURE,
};

/// `NumInstances` value for objects without instances.
const NO_INSTANCES: i32 = -1;

/// Counter values start after `ByteLength` and its padding.
const COUNTER_DATA_START: usize = 8;

/// One raw counter value with its optional second value.
pub type RawValue = (i64, Option<i64>);

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Builder for a complete `PERF_DATA_BLOCK`.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    system_name: String,
    system_time: DateTime<Utc>,
    perf_time: i64,
    perf_freq: i64,
    perf_time_100ns: i64,
    objects: Vec<ObjectBuilder>,
}

impl BlockBuilder {
    pub fn new(system_name: impl Into<String>) -> Self {
        Self {
            system_name: system_name.into(),
            system_time: DateTime::<Utc>::UNIX_EPOCH,
            perf_time: 0,
            perf_freq: 10_000_000,
            perf_time_100ns: WINDOWS_EPOCH,
            objects: Vec::new(),
        }
    }

    pub fn perf_time(mut self, perf_time: i64, perf_freq: i64) -> Self {
        self.perf_time = perf_time;
        self.perf_freq = perf_freq;
        self
    }

    pub fn system_time(mut self, time: DateTime<Utc>) -> Self {
        self.system_time = time;
        self.perf_time_100ns = time.timestamp_micros() * 10 + WINDOWS_EPOCH;
        self
    }

    pub fn object(mut self, object: ObjectBuilder) -> Self {
        self.objects.push(object);
        self
    }

    /// Serialize the block.
    pub fn build(&self) -> Vec<u8> {
        let name = utf16z(&self.system_name);
        let header_length = align8(DATA_BLOCK_SIZE + name.len());

        let mut buf = vec![0u8; header_length];
        for (i, unit) in SIGNATURE.iter().enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        put_u32(&mut buf, 8, 1);
        put_u32(&mut buf, 12, 1);
        put_u32(&mut buf, 16, 1);
        put_u32(&mut buf, 24, header_length as u32);
        put_u32(&mut buf, 28, self.objects.len() as u32);
        put_u32(&mut buf, 32, self.objects.first().map_or(0, |o| o.name_index));

        let t = &self.system_time;
        let fields = [
            t.year() as u16,
            t.month() as u16,
            t.weekday().num_days_from_sunday() as u16,
            t.day() as u16,
            t.hour() as u16,
            t.minute() as u16,
            t.second() as u16,
            (t.nanosecond() / 1_000_000).min(999) as u16,
        ];
        for (i, field) in fields.iter().enumerate() {
            let at = 36 + i * 2;
            buf[at..at + 2].copy_from_slice(&field.to_le_bytes());
        }

        buf[56..64].copy_from_slice(&self.perf_time.to_le_bytes());
        buf[64..72].copy_from_slice(&self.perf_freq.to_le_bytes());
        buf[72..80].copy_from_slice(&self.perf_time_100ns.to_le_bytes());
        put_u32(&mut buf, 80, name.len() as u32);
        put_u32(&mut buf, 84, DATA_BLOCK_SIZE as u32);
        buf[DATA_BLOCK_SIZE..DATA_BLOCK_SIZE + name.len()].copy_from_slice(&name);

        for object in &self.objects {
            buf.extend_from_slice(&object.build(self.perf_time, self.perf_freq));
        }

        let total = buf.len() as u32;
        put_u32(&mut buf, 20, total);
        buf
    }
}

#[derive(Debug, Clone)]
enum Layout {
    Single(Vec<RawValue>),
    Instances(Vec<(String, Vec<RawValue>)>),
}

/// Builder for one `PERF_OBJECT_TYPE` and its data.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    name_index: u32,
    help_index: u32,
    frequency: Option<i64>,
    counters: Vec<(u32, CounterType)>,
    layout: Layout,
    single_num_instances: i32,
}

impl ObjectBuilder {
    pub fn new(name_index: u32) -> Self {
        Self {
            name_index,
            help_index: name_index.saturating_add(1),
            frequency: None,
            counters: Vec::new(),
            layout: Layout::Single(Vec::new()),
            single_num_instances: NO_INSTANCES,
        }
    }

    pub fn help_index(mut self, index: u32) -> Self {
        self.help_index = index;
        self
    }

    /// Override the object's tick frequency. Defaults to the block's.
    pub fn frequency(mut self, frequency: i64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Add a counter definition. The value size follows the type code.
    pub fn counter(mut self, name_index: u32, counter_type: CounterType) -> Self {
        self.counters.push((name_index, counter_type));
        self
    }

    /// Values for a single-instance object.
    pub fn single(self, values: &[i64]) -> Self {
        let values = values.iter().map(|&v| (v, None)).collect::<Vec<_>>();
        self.single_with_second(&values)
    }

    pub fn single_with_second(mut self, values: &[RawValue]) -> Self {
        self.layout = Layout::Single(values.to_vec());
        self
    }

    /// `NumInstances` written for a single-instance object. Defaults to -1;
    /// some providers write 0.
    pub fn single_num_instances(mut self, num_instances: i32) -> Self {
        self.single_num_instances = num_instances;
        self
    }

    /// An instanced object that currently has no instances: `NumInstances`
    /// is 0 and no counter block follows the definitions.
    pub fn no_instances(mut self) -> Self {
        self.layout = Layout::Instances(Vec::new());
        self
    }

    /// Append a named instance.
    pub fn instance(self, name: &str, values: &[i64]) -> Self {
        let values = values.iter().map(|&v| (v, None)).collect::<Vec<_>>();
        self.instance_with_second(name, &values)
    }

    pub fn instance_with_second(mut self, name: &str, values: &[RawValue]) -> Self {
        let entry = (name.to_string(), values.to_vec());
        match &mut self.layout {
            Layout::Instances(instances) => instances.push(entry),
            Layout::Single(_) => self.layout = Layout::Instances(vec![entry]),
        }
        self
    }

    /// Offsets of each value within the counter block, and the block length.
    fn counter_layout(&self) -> (Vec<usize>, usize) {
        let mut offsets = Vec::with_capacity(self.counters.len());
        let mut at = COUNTER_DATA_START;
        for (_, counter_type) in &self.counters {
            offsets.push(at);
            at += counter_type.value_size() as usize;
            if counter_type.has_second_value() {
                at += 8;
            }
        }
        (offsets, align8(at))
    }

    fn counter_block(&self, offsets: &[usize], length: usize, values: &[RawValue]) -> Vec<u8> {
        let mut block = vec![0u8; length];
        put_u32(&mut block, 0, length as u32);

        for (i, (_, counter_type)) in self.counters.iter().enumerate() {
            let (value, second) = values.get(i).copied().unwrap_or((0, None));
            let at = offsets[i];
            write_value(&mut block, at, *counter_type, value);
            if counter_type.has_second_value() {
                write_value(&mut block, at + 8, *counter_type, second.unwrap_or(0));
            }
        }
        block
    }

    fn build(&self, perf_time: i64, perf_freq: i64) -> Vec<u8> {
        let (offsets, block_length) = self.counter_layout();
        let definition_length = OBJECT_TYPE_SIZE + COUNTER_DEFINITION_SIZE * self.counters.len();

        let mut buf = vec![0u8; definition_length];
        put_u32(&mut buf, 4, definition_length as u32);
        put_u32(&mut buf, 8, OBJECT_TYPE_SIZE as u32);
        put_u32(&mut buf, 12, self.name_index);
        put_u32(&mut buf, 20, self.help_index);
        put_u32(&mut buf, 28, 100);
        put_u32(&mut buf, 32, self.counters.len() as u32);
        buf[36..40].copy_from_slice(&(-1i32).to_le_bytes());
        buf[48..56].copy_from_slice(&perf_time.to_le_bytes());
        buf[56..64].copy_from_slice(&self.frequency.unwrap_or(perf_freq).to_le_bytes());

        for (i, (name_index, counter_type)) in self.counters.iter().enumerate() {
            let at = OBJECT_TYPE_SIZE + i * COUNTER_DEFINITION_SIZE;
            put_u32(&mut buf, at, COUNTER_DEFINITION_SIZE as u32);
            put_u32(&mut buf, at + 4, *name_index);
            put_u32(&mut buf, at + 12, name_index.saturating_add(1));
            put_u32(&mut buf, at + 24, 100);
            put_u32(&mut buf, at + 28, counter_type.bits());
            put_u32(&mut buf, at + 32, counter_type.value_size());
            put_u32(&mut buf, at + 36, offsets[i] as u32);
        }

        match &self.layout {
            Layout::Single(values) => {
                buf[40..44].copy_from_slice(&self.single_num_instances.to_le_bytes());
                buf.extend_from_slice(&self.counter_block(&offsets, block_length, values));
            }
            Layout::Instances(instances) => {
                buf[40..44].copy_from_slice(&(instances.len() as i32).to_le_bytes());
                for (unique_id, (name, values)) in instances.iter().enumerate() {
                    let name = utf16z(name);
                    let byte_length = align8(INSTANCE_DEFINITION_SIZE + name.len());

                    let mut instance = vec![0u8; byte_length];
                    put_u32(&mut instance, 0, byte_length as u32);
                    instance[12..16].copy_from_slice(&(unique_id as i32).to_le_bytes());
                    put_u32(&mut instance, 16, INSTANCE_DEFINITION_SIZE as u32);
                    put_u32(&mut instance, 20, name.len() as u32);
                    instance[INSTANCE_DEFINITION_SIZE..INSTANCE_DEFINITION_SIZE + name.len()]
                        .copy_from_slice(&name);

                    buf.extend_from_slice(&instance);
                    buf.extend_from_slice(&self.counter_block(&offsets, block_length, values));
                }
            }
        }

        let total = buf.len() as u32;
        put_u32(&mut buf, 0, total);
        buf
    }
}

fn write_value(block: &mut [u8], at: usize, counter_type: CounterType, value: i64) {
    if counter_type.value_size() == 8 {
        block[at..at + 8].copy_from_slice(&value.to_le_bytes());
    } else {
        block[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes());
    }
}

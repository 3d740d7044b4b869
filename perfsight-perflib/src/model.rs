//! Decoded performance data.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::counter_type::CounterType;
use crate::error::DecodeError;

/// Header of a performance data block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub version: u32,
    pub revision: u32,
    /// High-resolution performance counter value at sample time.
    pub perf_time: i64,
    /// Ticks per second of `perf_time`.
    pub perf_freq: i64,
    /// Sample time in 100ns units since 1601-01-01.
    pub perf_time_100ns: i64,
    /// Sample time in UTC, when the header carries a valid calendar date.
    pub system_time: Option<DateTime<Utc>>,
    pub system_name: String,
}

/// One named performance category, e.g. "Processor Information".
#[derive(Debug, Clone, PartialEq)]
pub struct CounterObject {
    pub name: String,
    pub name_index: u32,
    pub help: String,
    pub help_index: u32,
    pub detail_level: u32,
    pub default_counter: i32,
    pub code_page: u32,
    /// Ticks per second for time-based counters of this object.
    pub frequency: i64,
    pub timestamp: i64,
    pub counter_definitions: Vec<CounterDefinition>,
    pub instances: Vec<Instance>,
}

impl CounterObject {
    /// Pair each counter of `instance` with its definition.
    pub fn counters<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> impl Iterator<Item = (&'a CounterDefinition, &'a Counter)> {
        self.counter_definitions.iter().zip(instance.counters.iter())
    }

    /// Find a counter definition by name.
    pub fn definition(&self, name: &str) -> Option<&CounterDefinition> {
        self.counter_definitions.iter().find(|d| d.name == name)
    }

    /// Find an instance by name.
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }
}

/// Schema of one counter column shared by all instances of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterDefinition {
    pub name: String,
    pub name_index: u32,
    pub help: String,
    pub help_index: u32,
    pub counter_type: CounterType,
    pub default_scale: i32,
    pub detail_level: u32,
    /// Size in bytes of the raw value.
    pub size: u32,
    /// Offset of the raw value within each counter block.
    pub offset: u32,
    pub is_counter: bool,
    pub is_base_value: bool,
    pub has_second_value: bool,
    pub is_nanosecond_counter: bool,
}

/// One row of an object, e.g. one CPU core.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instance {
    /// Empty for single-instance objects.
    pub name: String,
    pub unique_id: i32,
    pub parent_object_index: u32,
    pub parent_instance: u32,
    /// One entry per counter definition, in definition order.
    pub counters: Vec<Counter>,
}

/// A raw counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counter {
    pub value: i64,
    pub second_value: Option<i64>,
}

/// An object that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDecodeError {
    /// Position of the object within the block.
    pub position: usize,
    /// Title index from the object header, when it could be read.
    pub name_index: Option<u32>,
    pub error: DecodeError,
}

/// A fully decoded performance data block.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfDataBlock {
    pub header: BlockHeader,
    pub objects: Vec<CounterObject>,
    /// Objects skipped because their contents were malformed.
    pub errors: Vec<ObjectDecodeError>,
}

/// One point-in-time view of the requested objects, keyed by object name.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub header: Option<BlockHeader>,
    pub objects: HashMap<String, CounterObject>,
    pub errors: Vec<ObjectDecodeError>,
}

impl Snapshot {
    /// An empty snapshot, used when nothing could be read.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Index the objects of a decoded block by name.
    pub fn from_block(block: PerfDataBlock) -> Self {
        let objects = block
            .objects
            .into_iter()
            .map(|object| (object.name.clone(), object))
            .collect();

        Self {
            header: Some(block.header),
            objects,
            errors: block.errors,
        }
    }

    pub fn get(&self, name: &str) -> Option<&CounterObject> {
        self.objects.get(name)
    }

    /// Look up an object, treating absence as an error.
    pub fn object(&self, name: &str) -> Result<&CounterObject, crate::PerflibError> {
        self.get(name)
            .ok_or_else(|| crate::PerflibError::MissingObject(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

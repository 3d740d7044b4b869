//! Decoder for the raw performance data block.
//!
//! Layout (all little-endian, see `winperf.h`):
//!
//! ```text
//! PERF_DATA_BLOCK            88 bytes, system name, padding
//! ├─ PERF_OBJECT_TYPE        64 bytes
//! │  ├─ PERF_COUNTER_DEFINITION × NumCounters      (40 bytes each)
//! │  └─ NumInstances <= 0:  PERF_COUNTER_BLOCK
//! │     NumInstances  > 0:  (PERF_INSTANCE_DEFINITION, name, PERF_COUNTER_BLOCK) × NumInstances
//! ├─ PERF_OBJECT_TYPE ...
//! ```
//!
//! Every structure declares its own length, and every read is checked against
//! the enclosing structure. A malformed object is reported and skipped; the
//! walk only stops when an object's own length cannot be trusted.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, trace, warn};

use crate::counter_type::CounterType;
use crate::cursor::ByteCursor;
use crate::error::DecodeError;
use crate::model::{
    BlockHeader, Counter, CounterDefinition, CounterObject, Instance, ObjectDecodeError,
    PerfDataBlock,
};
use crate::names::NameIndexTable;

/// Size of the fixed part of `PERF_DATA_BLOCK`.
pub const DATA_BLOCK_SIZE: usize = 88;
/// Size of `PERF_OBJECT_TYPE` on 64-bit Windows.
pub const OBJECT_TYPE_SIZE: usize = 64;
pub const COUNTER_DEFINITION_SIZE: usize = 40;
pub const INSTANCE_DEFINITION_SIZE: usize = 24;
/// Size of the `ByteLength` header of `PERF_COUNTER_BLOCK`.
pub const COUNTER_BLOCK_HEADER_SIZE: usize = 4;

/// `"PERF"` as UTF-16 code units.
pub const SIGNATURE: [u16; 4] = [0x50, 0x45, 0x52, 0x46];

/// Decode a raw performance data block.
///
/// `help` is optional; without it help strings are left empty.
pub fn parse_block(
    data: &[u8],
    names: &NameIndexTable,
    help: Option<&NameIndexTable>,
) -> Result<PerfDataBlock, DecodeError> {
    let buffer = ByteCursor::new(data);

    for (i, expected) in SIGNATURE.iter().enumerate() {
        if buffer.u16_at(i * 2)? != *expected {
            return Err(DecodeError::BadSignature);
        }
    }

    if buffer.u32_at(8)? != 1 {
        return Err(DecodeError::malformed("block: not little-endian"));
    }

    let total_length = buffer.usize_at(20)?;
    let header_length = buffer.usize_at(24)?;
    let num_objects = buffer.u32_at(28)?;

    // The system may hand back a buffer larger than the block itself.
    let block = buffer.sub(0, total_length)?;

    if header_length < DATA_BLOCK_SIZE || header_length > total_length {
        return Err(DecodeError::malformed(format!(
            "block: header length {} outside [{}, {}]",
            header_length, DATA_BLOCK_SIZE, total_length
        )));
    }

    let header = parse_header(&block)?;

    let mut objects = Vec::new();
    let mut errors = Vec::new();
    let mut offset = header_length;

    for position in 0..num_objects as usize {
        let object_length = match block.usize_at(offset) {
            Ok(len) => len,
            Err(error) => {
                errors.push(ObjectDecodeError {
                    position,
                    name_index: None,
                    error,
                });
                break;
            }
        };

        let object_cursor = match checked_object_view(&block, offset, object_length) {
            Ok(cursor) => cursor,
            Err(error) => {
                warn!(
                    position,
                    offset,
                    object_length,
                    "Untrusted object length, stopping block walk"
                );
                errors.push(ObjectDecodeError {
                    position,
                    name_index: block.u32_at(offset + 12).ok(),
                    error,
                });
                break;
            }
        };

        match parse_object(&object_cursor, names, help) {
            Ok(object) => {
                trace!(
                    object = %object.name,
                    counters = object.counter_definitions.len(),
                    instances = object.instances.len(),
                    "Decoded performance object"
                );
                objects.push(object);
            }
            Err(error) => {
                let name_index = object_cursor.u32_at(12).ok();
                warn!(
                    position,
                    name_index = ?name_index,
                    error = %error,
                    "Skipping malformed performance object"
                );
                errors.push(ObjectDecodeError {
                    position,
                    name_index,
                    error,
                });
            }
        }

        offset += object_length;
    }

    Ok(PerfDataBlock {
        header,
        objects,
        errors,
    })
}

fn checked_object_view<'a>(
    block: &ByteCursor<'a>,
    offset: usize,
    length: usize,
) -> Result<ByteCursor<'a>, DecodeError> {
    if length < OBJECT_TYPE_SIZE {
        return Err(DecodeError::malformed(format!(
            "object: total length {} smaller than header",
            length
        )));
    }
    block.sub(offset, length)
}

fn parse_header(block: &ByteCursor<'_>) -> Result<BlockHeader, DecodeError> {
    let system_name_length = block.usize_at(80)?;
    let system_name_offset = block.usize_at(84)?;

    let system_name = if system_name_length == 0 {
        String::new()
    } else {
        block
            .sub(system_name_offset, system_name_length)?
            .utf16z_at(0)
            .or_else(|_| block.utf16_at(system_name_offset, system_name_length))?
    };

    Ok(BlockHeader {
        version: block.u32_at(12)?,
        revision: block.u32_at(16)?,
        system_time: system_time(block, 36)?,
        perf_time: block.i64_at(56)?,
        perf_freq: block.i64_at(64)?,
        perf_time_100ns: block.i64_at(72)?,
        system_name,
    })
}

/// Convert a `SYSTEMTIME` to UTC, `None` when the fields do not form a date.
fn system_time(block: &ByteCursor<'_>, offset: usize) -> Result<Option<DateTime<Utc>>, DecodeError> {
    let field = |n: usize| block.u16_at(offset + n * 2).map(u32::from);

    let year = field(0)? as i32;
    let month = field(1)?;
    let day = field(3)?;
    let hour = field(4)?;
    let minute = field(5)?;
    let second = field(6)?;
    let millis = field(7)?;

    Ok(NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_milli_opt(hour, minute, second, millis))
        .map(|dt| dt.and_utc()))
}

fn relative(base: usize, offset: usize) -> Result<usize, DecodeError> {
    base.checked_add(offset)
        .ok_or_else(|| DecodeError::malformed(format!("offset {} + {} overflows", base, offset)))
}

fn parse_object(
    object: &ByteCursor<'_>,
    names: &NameIndexTable,
    help: Option<&NameIndexTable>,
) -> Result<CounterObject, DecodeError> {
    let definition_length = object.usize_at(4)?;
    let header_length = object.usize_at(8)?;
    let name_index = object.u32_at(12)?;
    let help_index = object.u32_at(20)?;
    let num_counters = object.u32_at(32)? as usize;
    let num_instances = object.i32_at(40)?;

    if header_length < OBJECT_TYPE_SIZE
        || header_length > definition_length
        || definition_length > object.len()
    {
        return Err(DecodeError::malformed(format!(
            "object {}: header length {} / definition length {} inconsistent with total {}",
            name_index,
            header_length,
            definition_length,
            object.len()
        )));
    }

    let name = resolve(names, name_index);
    let counter_definitions =
        parse_definitions(object, header_length, definition_length, num_counters, names, help)?;
    check_base_pairs(&name, &counter_definitions);

    let frequency = object.i64_at(56)?;
    if frequency <= 0
        && counter_definitions
            .iter()
            .any(|d| d.counter_type == CounterType::ELAPSED_TIME)
    {
        debug!(object = %name, frequency, "Object has elapsed-time counters but no frequency");
    }

    // An instanced object with no current instances ends at its definitions.
    let instances = if num_instances == 0 && definition_length == object.len() {
        Vec::new()
    } else if num_instances <= 0 {
        let (counters, _) = parse_counter_block(object, definition_length, &counter_definitions)?;
        vec![Instance {
            counters,
            ..Instance::default()
        }]
    } else {
        parse_instances(
            object,
            definition_length,
            num_instances as usize,
            &counter_definitions,
        )?
    };

    Ok(CounterObject {
        name,
        name_index,
        help: help.map(|h| resolve(h, help_index)).unwrap_or_default(),
        help_index,
        detail_level: object.u32_at(28)?,
        default_counter: object.i32_at(36)?,
        code_page: object.u32_at(44)?,
        frequency,
        timestamp: object.i64_at(48)?,
        counter_definitions,
        instances,
    })
}

fn resolve(table: &NameIndexTable, index: u32) -> String {
    match table.lookup_name(index) {
        Some(name) => name.to_string(),
        None => {
            trace!(index, "Title index not in name table");
            String::new()
        }
    }
}

fn parse_definitions(
    object: &ByteCursor<'_>,
    start: usize,
    end: usize,
    count: usize,
    names: &NameIndexTable,
    help: Option<&NameIndexTable>,
) -> Result<Vec<CounterDefinition>, DecodeError> {
    let area = object.sub(0, end)?;
    let mut definitions = Vec::with_capacity(count.min(end / COUNTER_DEFINITION_SIZE));
    let mut offset = start;

    for _ in 0..count {
        let byte_length = area.usize_at(offset)?;
        if byte_length < COUNTER_DEFINITION_SIZE {
            return Err(DecodeError::malformed(format!(
                "counter definition at {}: length {}",
                offset, byte_length
            )));
        }
        let def = area.sub(offset, byte_length)?;

        let name_index = def.u32_at(4)?;
        let help_index = def.u32_at(12)?;
        let counter_type = CounterType(def.u32_at(28)?);

        definitions.push(CounterDefinition {
            name: resolve(names, name_index),
            name_index,
            help: help.map(|h| resolve(h, help_index)).unwrap_or_default(),
            help_index,
            counter_type,
            default_scale: def.i32_at(20)?,
            detail_level: def.u32_at(24)?,
            size: def.u32_at(32)?,
            offset: def.u32_at(36)?,
            is_counter: counter_type.is_counter(),
            is_base_value: counter_type.is_base_value(),
            has_second_value: counter_type.has_second_value(),
            is_nanosecond_counter: counter_type.is_nanosecond_counter(),
        });

        offset = relative(offset, byte_length)?;
    }

    Ok(definitions)
}

/// Fraction counters are expected to have a base definition of the same name.
fn check_base_pairs(object: &str, definitions: &[CounterDefinition]) {
    for def in definitions
        .iter()
        .filter(|d| d.counter_type.requires_base() && !d.is_base_value)
    {
        let has_base = definitions
            .iter()
            .any(|b| b.is_base_value && b.name == def.name);
        if !has_base {
            debug!(object, counter = %def.name, "Fraction counter has no base value");
        }
    }
}

fn parse_instances(
    object: &ByteCursor<'_>,
    start: usize,
    count: usize,
    definitions: &[CounterDefinition],
) -> Result<Vec<Instance>, DecodeError> {
    let mut instances = Vec::with_capacity(count.min(object.len() / INSTANCE_DEFINITION_SIZE));
    let mut offset = start;

    for _ in 0..count {
        let byte_length = object.usize_at(offset)?;
        if byte_length < INSTANCE_DEFINITION_SIZE {
            return Err(DecodeError::malformed(format!(
                "instance at {}: length {}",
                offset, byte_length
            )));
        }
        let def = object.sub(offset, byte_length)?;

        let name_offset = def.usize_at(16)?;
        let name_length = def.usize_at(20)?;
        let name = def.utf16_at(name_offset, name_length)?;

        let block_offset = relative(offset, byte_length)?;
        let (counters, block_length) = parse_counter_block(object, block_offset, definitions)?;

        instances.push(Instance {
            name,
            unique_id: def.i32_at(12)?,
            parent_object_index: def.u32_at(4)?,
            parent_instance: def.u32_at(8)?,
            counters,
        });

        offset = relative(block_offset, block_length)?;
    }

    Ok(instances)
}

fn parse_counter_block(
    object: &ByteCursor<'_>,
    offset: usize,
    definitions: &[CounterDefinition],
) -> Result<(Vec<Counter>, usize), DecodeError> {
    let block_length = object.usize_at(offset)?;
    if block_length < COUNTER_BLOCK_HEADER_SIZE {
        return Err(DecodeError::malformed(format!(
            "counter block at {}: length {}",
            offset, block_length
        )));
    }
    let block = object.sub(offset, block_length)?;

    let counters = definitions
        .iter()
        .map(|def| {
            let at = def.offset as usize;
            let value = read_value(&block, at, def.size)?;
            let second_value = if def.has_second_value {
                Some(read_value(&block, relative(at, 8)?, def.size)?)
            } else {
                None
            };
            Ok(Counter {
                value,
                second_value,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok((counters, block_length))
}

/// 8-byte values are read whole; anything else as an unsigned 32-bit value.
fn read_value(block: &ByteCursor<'_>, offset: usize, size: u32) -> Result<i64, DecodeError> {
    match size {
        8 => block.i64_at(offset),
        _ => block.u32_at(offset).map(i64::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BlockBuilder, ObjectBuilder};

    fn names() -> NameIndexTable {
        NameIndexTable::from_pairs([
            (2, "System"),
            (4, "Memory"),
            (6, "% Processor Time"),
            (10, "Processes"),
            (24, "Available Bytes"),
            (238, "Processor"),
            (674, "System Up Time"),
        ])
    }

    fn help() -> NameIndexTable {
        NameIndexTable::from_pairs([(3, "The System object type"), (7, "Time spent busy")])
    }

    #[test]
    fn test_parse_header() {
        let data = BlockBuilder::new("HOST01")
            .perf_time(1_000, 10_000_000)
            .build();

        let block = parse_block(&data, &names(), None).unwrap();

        assert_eq!(block.header.system_name, "HOST01");
        assert_eq!(block.header.perf_time, 1_000);
        assert_eq!(block.header.perf_freq, 10_000_000);
        assert!(block.header.system_time.is_some());
        assert!(block.objects.is_empty());
        assert!(block.errors.is_empty());
    }

    #[test]
    fn test_single_instance_object() {
        let data = BlockBuilder::new("HOST01")
            .object(
                ObjectBuilder::new(2)
                    .help_index(3)
                    .counter(10, CounterType::RAWCOUNT)
                    .counter(674, CounterType::ELAPSED_TIME)
                    .single(&[123, 133_000_000_000_000_000]),
            )
            .build();

        let block = parse_block(&data, &names(), Some(&help())).unwrap();
        let system = &block.objects[0];

        assert_eq!(system.name, "System");
        assert_eq!(system.help, "The System object type");
        assert_eq!(system.instances.len(), 1);
        assert_eq!(system.instances[0].name, "");
        assert_eq!(system.instances[0].counters[0].value, 123);
        assert_eq!(
            system.instances[0].counters[1].value,
            133_000_000_000_000_000
        );
        assert_eq!(system.counter_definitions[1].size, 8);
    }

    #[test]
    fn test_multi_instance_preserves_order() {
        let data = BlockBuilder::new("HOST01")
            .object(
                ObjectBuilder::new(238)
                    .counter(6, CounterType::TIMER_100NS)
                    .instance("1", &[200])
                    .instance("0", &[100])
                    .instance("_Total", &[300]),
            )
            .build();

        let block = parse_block(&data, &names(), None).unwrap();
        let processor = &block.objects[0];
        let names: Vec<_> = processor.instances.iter().map(|i| i.name.as_str()).collect();

        assert_eq!(names, vec!["1", "0", "_Total"]);
        assert_eq!(processor.instances[0].counters[0].value, 200);
        assert_eq!(processor.instances[2].counters[0].value, 300);
    }

    #[test]
    fn test_zero_instances_without_counter_block() {
        let data = BlockBuilder::new("HOST01")
            .object(
                ObjectBuilder::new(238)
                    .counter(6, CounterType::TIMER_100NS)
                    .no_instances(),
            )
            .object(ObjectBuilder::new(2).counter(10, CounterType::RAWCOUNT).single(&[7]))
            .build();

        let block = parse_block(&data, &names(), None).unwrap();

        assert!(block.errors.is_empty());
        assert_eq!(block.objects.len(), 2);
        assert_eq!(block.objects[0].name, "Processor");
        assert!(block.objects[0].instances.is_empty());
        assert_eq!(block.objects[0].counter_definitions.len(), 1);
        assert_eq!(block.objects[1].instances[0].counters[0].value, 7);
    }

    #[test]
    fn test_zero_instances_with_counter_block() {
        let data = BlockBuilder::new("HOST01")
            .object(
                ObjectBuilder::new(2)
                    .counter(10, CounterType::RAWCOUNT)
                    .single(&[42])
                    .single_num_instances(0),
            )
            .build();

        let block = parse_block(&data, &names(), None).unwrap();
        let system = &block.objects[0];

        assert!(block.errors.is_empty());
        assert_eq!(system.instances.len(), 1);
        assert_eq!(system.instances[0].name, "");
        assert_eq!(system.instances[0].counters[0].value, 42);
    }

    #[test]
    fn test_definition_flags() {
        let data = BlockBuilder::new("HOST01")
            .object(
                ObjectBuilder::new(238)
                    .counter(6, CounterType::RAW_FRACTION)
                    .counter(6, CounterType::RAW_BASE)
                    .counter(6, CounterType::AVERAGE_BULK)
                    .instance("0", &[1, 2, 3]),
            )
            .build();

        let block = parse_block(&data, &names(), None).unwrap();
        let defs = &block.objects[0].counter_definitions;

        assert!(!defs[0].is_base_value);
        assert!(defs[1].is_base_value);
        assert!(defs[2].has_second_value);
        assert_eq!(block.objects[0].instances[0].counters[2].second_value, Some(0));
        assert_eq!(block.objects[0].instances[0].counters[0].second_value, None);
    }

    #[test]
    fn test_second_value_decoded() {
        let data = BlockBuilder::new("HOST01")
            .object(
                ObjectBuilder::new(4)
                    .counter(24, CounterType::AVERAGE_BULK)
                    .single_with_second(&[(4096, Some(8))]),
            )
            .build();

        let block = parse_block(&data, &names(), None).unwrap();
        let counter = block.objects[0].instances[0].counters[0];

        assert_eq!(counter.value, 4096);
        assert_eq!(counter.second_value, Some(8));
    }

    #[test]
    fn test_unknown_index_gives_empty_name() {
        let data = BlockBuilder::new("HOST01")
            .object(
                ObjectBuilder::new(9999)
                    .counter(8888, CounterType::RAWCOUNT)
                    .single(&[1]),
            )
            .build();

        let block = parse_block(&data, &names(), None).unwrap();

        assert_eq!(block.objects[0].name, "");
        assert_eq!(block.objects[0].name_index, 9999);
        assert_eq!(block.objects[0].counter_definitions[0].name, "");
    }

    #[test]
    fn test_bad_signature() {
        let mut data = BlockBuilder::new("HOST01").build();
        data[0] = b'X';

        assert_eq!(
            parse_block(&data, &names(), None),
            Err(DecodeError::BadSignature)
        );
    }

    #[test]
    fn test_truncated_header() {
        let data = BlockBuilder::new("HOST01").build();

        assert!(matches!(
            parse_block(&data[..40], &names(), None),
            Err(DecodeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_total_length_exceeds_buffer() {
        let data = BlockBuilder::new("HOST01")
            .object(ObjectBuilder::new(2).counter(10, CounterType::RAWCOUNT).single(&[1]))
            .build();
        let truncated = &data[..data.len() - 8];

        assert!(matches!(
            parse_block(truncated, &names(), None),
            Err(DecodeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_trailing_buffer_space_ignored() {
        let mut data = BlockBuilder::new("HOST01")
            .object(ObjectBuilder::new(2).counter(10, CounterType::RAWCOUNT).single(&[5]))
            .build();
        data.extend_from_slice(&[0xAA; 128]);

        let block = parse_block(&data, &names(), None).unwrap();
        assert_eq!(block.objects.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_block(&[], &names(), None).is_err());
    }
}

//! Tag-driven mapping of decoded instances onto typed records.
//!
//! A record type declares, once and statically, which counters feed which of
//! its fields:
//!
//! ```
//! use perfsight_perflib::{Binding, PerfRecord};
//!
//! #[derive(Debug, Default)]
//! struct Processor {
//!     name: String,
//!     idle_time: f64,
//!     interrupts: f64,
//! }
//!
//! impl PerfRecord for Processor {
//!     const BINDINGS: &'static [Binding<Self>] = &[
//!         Binding::new("% Idle Time", |r: &mut Self, v| r.idle_time = v),
//!         Binding::new("Interrupts/sec", |r: &mut Self, v| r.interrupts = v),
//!     ];
//!
//!     fn set_instance_name(&mut self, name: &str) {
//!         self.name = name.to_string();
//!     }
//! }
//! ```
//!
//! A tag is either `"<counter name>"` or `"<counter name>,secondvalue"`.
//! Base counters of fraction counters are addressed as `"<counter name>_Base"`.

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::{trace, warn};

use crate::counter_type::{CounterType, TICKS_TO_SECONDS, WINDOWS_EPOCH};
use crate::error::UnmarshalError;
use crate::model::{Counter, CounterDefinition, CounterObject};

/// One field binding of a [`PerfRecord`].
pub struct Binding<T> {
    tag: &'static str,
    set: fn(&mut T, f64),
}

impl<T> Binding<T> {
    pub const fn new(tag: &'static str, set: fn(&mut T, f64)) -> Self {
        Self { tag, set }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Binding<T> {}

impl<T> std::fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding").field("tag", &self.tag).finish()
    }
}

/// A record populated from one instance of a performance object.
pub trait PerfRecord: Default + 'static {
    /// The record's counter bindings.
    const BINDINGS: &'static [Binding<Self>];

    /// Called with the instance name when it is non-empty.
    fn set_instance_name(&mut self, _name: &str) {}
}

/// A binding with its tag parsed.
struct ResolvedBinding<T: 'static> {
    counter: &'static str,
    second_value: bool,
    binding: &'static Binding<T>,
}

fn parse_tag<T>(binding: &'static Binding<T>) -> Result<ResolvedBinding<T>, UnmarshalError> {
    let tag = binding.tag;
    let mut parts = tag.split(',');
    let counter = parts.next().unwrap_or_default().trim();
    if counter.is_empty() {
        return Err(UnmarshalError::EmptyCounterName { tag });
    }

    let mut second_value = false;
    for option in parts.map(str::trim) {
        match option {
            "secondvalue" => second_value = true,
            "" => {}
            other => {
                return Err(UnmarshalError::UnknownOption {
                    tag,
                    option: other.to_string(),
                });
            }
        }
    }

    Ok(ResolvedBinding {
        counter,
        second_value,
        binding,
    })
}

/// Key under which a definition is looked up by bindings.
fn lookup_key(def: &CounterDefinition) -> Cow<'_, str> {
    if def.is_base_value && !def.is_nanosecond_counter {
        Cow::Owned(format!("{}_Base", def.name))
    } else {
        Cow::Borrowed(def.name.as_str())
    }
}

/// Convert a primary value to the unit exposed to records.
///
/// `None` means the value cannot be converted and the field is left untouched.
fn convert(def: &CounterDefinition, counter: &Counter, frequency: i64) -> Option<f64> {
    match def.counter_type {
        CounterType::ELAPSED_TIME => {
            if frequency <= 0 {
                warn!(
                    counter = %def.name,
                    frequency,
                    "Elapsed-time counter without a valid frequency, skipping"
                );
                return None;
            }
            Some((counter.value as f64 - WINDOWS_EPOCH as f64) / frequency as f64)
        }
        CounterType::TIMER_100NS | CounterType::PRECISION_100NS_TIMER => {
            Some(counter.value as f64 * TICKS_TO_SECONDS)
        }
        _ => Some(counter.value as f64),
    }
}

/// Populate `dst` with one record per instance of `object`.
///
/// `dst` is extended with default records to at least the instance count;
/// existing records are updated in place. Records keep the instance order of
/// the object. Counters absent from an instance leave their fields untouched.
pub fn unmarshal_into<T: PerfRecord>(
    object: &CounterObject,
    dst: &mut Vec<T>,
) -> Result<(), UnmarshalError> {
    let bindings = T::BINDINGS
        .iter()
        .map(parse_tag)
        .collect::<Result<Vec<_>, _>>()?;

    if dst.len() < object.instances.len() {
        dst.resize_with(object.instances.len(), T::default);
    }

    for (instance, record) in object.instances.iter().zip(dst.iter_mut()) {
        let counters: HashMap<Cow<'_, str>, (&CounterDefinition, &Counter)> = object
            .counters(instance)
            .map(|(def, counter)| (lookup_key(def), (def, counter)))
            .collect();

        for resolved in &bindings {
            let Some((def, counter)) = counters.get(resolved.counter) else {
                trace!(
                    object = %object.name,
                    instance = %instance.name,
                    counter = resolved.counter,
                    "Counter not present in instance"
                );
                continue;
            };

            let value = if resolved.second_value {
                if !def.has_second_value {
                    return Err(UnmarshalError::NoSecondValue {
                        tag: resolved.binding.tag,
                        counter: def.name.clone(),
                    });
                }
                counter.second_value.map(|v| v as f64)
            } else {
                convert(def, counter, object.frequency)
            };

            if let Some(value) = value {
                (resolved.binding.set)(record, value);
            }
        }

        if !instance.name.is_empty() {
            record.set_instance_name(&instance.name);
        }
    }

    Ok(())
}

/// Unmarshal `object` into fresh records.
pub fn unmarshal<T: PerfRecord>(object: &CounterObject) -> Result<Vec<T>, UnmarshalError> {
    let mut records = Vec::with_capacity(object.instances.len());
    unmarshal_into(object, &mut records)?;
    Ok(records)
}

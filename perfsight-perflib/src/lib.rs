//! Decoding of Windows performance-counter data.
//!
//! This crate turns the raw performance data block published by the system
//! into a tree of [`CounterObject`]s, and maps that tree onto typed records:
//!
//! - [`names`]: the title-index ↔ display-name table
//! - [`reader`]: where raw blocks come from ([`RawSnapshotReader`])
//! - [`parser`]: the bounds-checked block decoder
//! - [`unmarshal`]: declarative record binding ([`PerfRecord`])
//! - [`snapshot`]: the [`Perflib`] engine tying them together
//! - [`builder`]: an encoder producing well-formed blocks

pub mod builder;
pub mod counter_type;
pub mod cursor;
pub mod error;
pub mod model;
pub mod names;
pub mod parser;
pub mod reader;
pub mod snapshot;
pub mod unmarshal;

pub use builder::{BlockBuilder, ObjectBuilder};
pub use counter_type::CounterType;
pub use cursor::ByteCursor;
pub use error::{DecodeError, PerflibError, Result, UnmarshalError};
pub use model::{
    BlockHeader, Counter, CounterDefinition, CounterObject, Instance, ObjectDecodeError,
    PerfDataBlock, Snapshot,
};
pub use names::NameIndexTable;
pub use parser::parse_block;
#[cfg(windows)]
pub use reader::RegistryReader;
pub use reader::{Query, RawSnapshotReader, StaticReader};
pub use snapshot::Perflib;
pub use unmarshal::{Binding, PerfRecord, unmarshal, unmarshal_into};

//! Sources of raw performance data blocks.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::error::Result;
use crate::names::NameIndexTable;

/// What to ask the system for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// All objects except costly ones.
    Global,
    /// Objects that are expensive to collect.
    Costly,
    /// Specific objects by title index, in request order.
    Indices(Vec<u32>),
}

impl Query {
    /// The registry value name that selects this query.
    pub fn as_value_name(&self) -> String {
        match self {
            Query::Global => "Global".to_string(),
            Query::Costly => "Costly".to_string(),
            Query::Indices(indices) => indices
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// An index query that selects nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Query::Indices(indices) if indices.is_empty())
    }
}

/// A privileged reader of live counter state.
///
/// Calls block; async callers run them on the blocking pool.
pub trait RawSnapshotReader: Send + Sync {
    /// Read the raw data block for `query` as of now.
    fn fetch(&self, query: &Query) -> Result<Vec<u8>>;

    /// The counter name table.
    fn name_table(&self) -> Result<NameIndexTable>;

    /// The counter help table.
    fn help_table(&self) -> Result<NameIndexTable>;
}

/// A reader serving one fixed block, regardless of the query.
#[derive(Debug, Default)]
pub struct StaticReader {
    block: Vec<u8>,
    names: NameIndexTable,
    help: NameIndexTable,
    fetches: AtomicUsize,
}

impl StaticReader {
    pub fn new(block: Vec<u8>, names: NameIndexTable) -> Self {
        Self {
            block,
            names,
            ..Self::default()
        }
    }

    pub fn with_help(mut self, help: NameIndexTable) -> Self {
        self.help = help;
        self
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl RawSnapshotReader for StaticReader {
    fn fetch(&self, query: &Query) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        trace!(query = %query.as_value_name(), bytes = self.block.len(), "Serving static block");
        Ok(self.block.clone())
    }

    fn name_table(&self) -> Result<NameIndexTable> {
        Ok(self.names.clone())
    }

    fn help_table(&self) -> Result<NameIndexTable> {
        Ok(self.help.clone())
    }
}

#[cfg(windows)]
pub use registry::RegistryReader;

#[cfg(windows)]
mod registry {
    use std::ptr;

    use tracing::debug;
    use winapi::shared::minwindef::DWORD;
    use winapi::shared::winerror::{ERROR_MORE_DATA, ERROR_SUCCESS};
    use winapi::um::winreg::{HKEY_PERFORMANCE_DATA, RegCloseKey, RegQueryValueExW};

    use super::{Query, RawSnapshotReader};
    use crate::error::{PerflibError, Result};
    use crate::names::NameIndexTable;

    const INITIAL_BUFFER: usize = 64 * 1024;
    const MAX_BUFFER: usize = 64 * 1024 * 1024;

    /// Reads performance data through the `HKEY_PERFORMANCE_DATA` registry key.
    #[derive(Debug, Clone)]
    pub struct RegistryReader {
        language: String,
    }

    impl RegistryReader {
        /// `language` is the LCID in hex as used by the name tables, e.g. `009`.
        pub fn new(language: impl Into<String>) -> Self {
            Self {
                language: language.into(),
            }
        }

        fn query_value(&self, value_name: &str) -> Result<Vec<u8>> {
            let wide: Vec<u16> = value_name
                .encode_utf16()
                .chain(std::iter::once(0))
                .collect();
            let mut buffer = vec![0u8; INITIAL_BUFFER];

            let result = loop {
                let mut size = buffer.len() as DWORD;
                // SAFETY: `wide` is NUL-terminated and `size` matches `buffer`.
                let status = unsafe {
                    RegQueryValueExW(
                        HKEY_PERFORMANCE_DATA,
                        wide.as_ptr(),
                        ptr::null_mut(),
                        ptr::null_mut(),
                        buffer.as_mut_ptr(),
                        &mut size,
                    )
                } as DWORD;

                match status {
                    ERROR_SUCCESS => {
                        buffer.truncate(size as usize);
                        break Ok(buffer);
                    }
                    ERROR_MORE_DATA if buffer.len() < MAX_BUFFER => {
                        let next = (buffer.len() * 2).min(MAX_BUFFER);
                        debug!(value = value_name, size = next, "Growing performance data buffer");
                        buffer.resize(next, 0);
                    }
                    code => {
                        break Err(PerflibError::os(
                            code,
                            format!("RegQueryValueExW(\"{}\")", value_name),
                        ));
                    }
                }
            };

            // SAFETY: closing the predefined key releases the provider handles.
            unsafe {
                RegCloseKey(HKEY_PERFORMANCE_DATA);
            }

            result
        }
    }

    impl Default for RegistryReader {
        fn default() -> Self {
            Self::new("009")
        }
    }

    impl RawSnapshotReader for RegistryReader {
        fn fetch(&self, query: &Query) -> Result<Vec<u8>> {
            self.query_value(&query.as_value_name())
        }

        fn name_table(&self) -> Result<NameIndexTable> {
            let raw = self.query_value(&format!("Counter {}", self.language))?;
            Ok(NameIndexTable::from_multi_sz(&raw)?)
        }

        fn help_table(&self) -> Result<NameIndexTable> {
            let raw = self.query_value(&format!("Help {}", self.language))?;
            Ok(NameIndexTable::from_multi_sz(&raw)?)
        }
    }
}

//! Counter name/index table.
//!
//! Performance objects and counters are addressed by numeric title indices.
//! The system publishes a localized table mapping each index to its display
//! string ("Counter 009" for English, "Help 009" for help text) as a
//! REG_MULTI_SZ of alternating `index\0name\0` entries.

use std::collections::HashMap;

use tracing::debug;

use crate::error::DecodeError;

/// Bidirectional mapping between title indices and display strings.
///
/// Built once and shared read-only (typically behind an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct NameIndexTable {
    by_index: HashMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl NameIndexTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(index, name)` pairs.
    ///
    /// When a display string appears more than once, the last index wins.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (index, name) in pairs {
            table.insert(index, name.into());
        }
        table
    }

    /// Parse the raw UTF-16LE multi-string returned by the system.
    ///
    /// Entries whose index is not a number are skipped; a trailing index
    /// without a name is ignored.
    pub fn from_multi_sz(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() % 2 != 0 {
            return Err(DecodeError::malformed(format!(
                "name table of odd length {}",
                raw.len()
            )));
        }

        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let mut strings = units
            .split(|&u| u == 0)
            .filter(|s| !s.is_empty())
            .map(String::from_utf16_lossy);

        let mut table = Self::new();
        while let (Some(index), Some(name)) = (strings.next(), strings.next()) {
            match index.trim().parse::<u32>() {
                Ok(index) => table.insert(index, name),
                Err(_) => debug!(entry = %index, "Skipping name table entry with invalid index"),
            }
        }

        debug!(entries = table.len(), "Parsed name table");
        Ok(table)
    }

    fn insert(&mut self, index: u32, name: String) {
        self.by_name.insert(name.clone(), index);
        self.by_index.insert(index, name);
    }

    /// Resolve a display string to its index.
    ///
    /// `None` means the counter is unavailable on this system.
    pub fn lookup_index(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Resolve an index to its display string.
    pub fn lookup_name(&self, index: u32) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_sz(entries: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in entries {
            for unit in entry.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out.extend_from_slice(&[0, 0]);
        }
        out.extend_from_slice(&[0, 0]);
        out
    }

    #[test]
    fn test_parse_multi_sz() {
        let raw = multi_sz(&["1", "1847", "2", "System", "4", "Memory", "238", "Processor"]);
        let table = NameIndexTable::from_multi_sz(&raw).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.lookup_index("System"), Some(2));
        assert_eq!(table.lookup_index("Processor"), Some(238));
        assert_eq!(table.lookup_name(4), Some("Memory"));
    }

    #[test]
    fn test_unknown_name_is_none() {
        let table = NameIndexTable::from_pairs([(2, "System")]);

        assert_eq!(table.lookup_index("Nonexistent"), None);
        assert_eq!(table.lookup_name(99), None);
    }

    #[test]
    fn test_invalid_index_is_skipped() {
        let raw = multi_sz(&["abc", "Broken", "6", "% Processor Time"]);
        let table = NameIndexTable::from_multi_sz(&raw).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup_index("% Processor Time"), Some(6));
        assert_eq!(table.lookup_index("Broken"), None);
    }

    #[test]
    fn test_trailing_index_without_name() {
        let raw = multi_sz(&["2", "System", "4"]);
        let table = NameIndexTable::from_multi_sz(&raw).unwrap();

        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_name_last_wins() {
        let table = NameIndexTable::from_pairs([(10, "Duplicate"), (20, "Duplicate")]);

        assert_eq!(table.lookup_index("Duplicate"), Some(20));
        assert_eq!(table.lookup_name(10), Some("Duplicate"));
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(NameIndexTable::from_multi_sz(&[0x31, 0x00, 0x00]).is_err());
    }
}

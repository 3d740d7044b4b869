//! Bounds-checked little-endian reads over a byte buffer.

use crate::error::DecodeError;

/// A read-only view into a performance data buffer.
///
/// Every read takes an offset relative to the start of the view and fails with
/// [`DecodeError::OutOfBounds`] instead of reading past the end. Sub-views
/// restrict later reads to one object or instance.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow `len` bytes at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = offset.checked_add(len).ok_or(DecodeError::OutOfBounds {
            offset,
            len,
            size: self.data.len(),
        })?;
        self.data.get(offset..end).ok_or(DecodeError::OutOfBounds {
            offset,
            len,
            size: self.data.len(),
        })
    }

    /// A view of `len` bytes starting at `offset`.
    pub fn sub(&self, offset: usize, len: usize) -> Result<ByteCursor<'a>, DecodeError> {
        self.bytes(offset, len).map(ByteCursor::new)
    }

    /// A view from `offset` to the end of this one.
    pub fn tail(&self, offset: usize) -> Result<ByteCursor<'a>, DecodeError> {
        let len = self.data.len().checked_sub(offset).ok_or(DecodeError::OutOfBounds {
            offset,
            len: 0,
            size: self.data.len(),
        })?;
        self.sub(offset, len)
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16, DecodeError> {
        self.array(offset).map(u16::from_le_bytes)
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32, DecodeError> {
        self.array(offset).map(u32::from_le_bytes)
    }

    pub fn i32_at(&self, offset: usize) -> Result<i32, DecodeError> {
        self.array(offset).map(i32::from_le_bytes)
    }

    pub fn i64_at(&self, offset: usize) -> Result<i64, DecodeError> {
        self.array(offset).map(i64::from_le_bytes)
    }

    /// A `u32` field used as an offset or length.
    pub fn usize_at(&self, offset: usize) -> Result<usize, DecodeError> {
        self.u32_at(offset).map(|v| v as usize)
    }

    /// Decode a UTF-16LE string occupying exactly `byte_len` bytes.
    ///
    /// The length is authoritative: trailing NULs are trimmed, but the string
    /// is not cut at an embedded terminator before the declared end.
    pub fn utf16_at(&self, offset: usize, byte_len: usize) -> Result<String, DecodeError> {
        let raw = self.bytes(offset, byte_len & !1)?;
        let mut units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        while units.last() == Some(&0) {
            units.pop();
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// Decode a NUL-terminated UTF-16LE string starting at `offset`.
    ///
    /// Fails if no terminator is found before the end of the view.
    pub fn utf16z_at(&self, offset: usize) -> Result<String, DecodeError> {
        let mut units = Vec::new();
        let mut pos = offset;
        loop {
            let unit = self.u16_at(pos)?;
            if unit == 0 {
                break;
            }
            units.push(unit);
            pos += 2;
        }
        Ok(String::from_utf16_lossy(&units))
    }
}

//! Performance counter type codes.
//!
//! A counter type is a bit field (see `winperf.h`) describing the size of the
//! raw value, how it is to be interpreted, and how it relates to other
//! counters. Only the predicates the decoder and unmarshaler rely on are
//! exposed here.

use std::fmt;

/// Offset between the Windows FILETIME epoch (1601-01-01) and the Unix epoch,
/// in 100-nanosecond ticks.
pub const WINDOWS_EPOCH: i64 = 116_444_736_000_000_000;

/// Scale factor from 100-nanosecond ticks to seconds.
pub const TICKS_TO_SECONDS: f64 = 1e-7;

/// A raw `CounterType` value from a counter definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterType(pub u32);

impl CounterType {
    pub const RAWCOUNT_HEX: Self = Self(0x0000_0000);
    pub const LARGE_RAWCOUNT_HEX: Self = Self(0x0000_0100);
    pub const RAWCOUNT: Self = Self(0x0001_0000);
    pub const LARGE_RAWCOUNT: Self = Self(0x0001_0100);
    pub const COUNTER: Self = Self(0x1041_0400);
    pub const BULK_COUNT: Self = Self(0x1041_0500);
    pub const TIMER: Self = Self(0x2041_0500);
    pub const TIMER_100NS: Self = Self(0x2051_0500);
    pub const TIMER_100NS_INV: Self = Self(0x2151_0500);
    pub const PRECISION_100NS_TIMER: Self = Self(0x2057_0500);
    pub const RAW_FRACTION: Self = Self(0x2002_0400);
    pub const LARGE_RAW_FRACTION: Self = Self(0x2002_0500);
    pub const SAMPLE_FRACTION: Self = Self(0x20C2_0400);
    pub const AVERAGE_TIMER: Self = Self(0x3002_0400);
    pub const ELAPSED_TIME: Self = Self(0x3024_0500);
    pub const AVERAGE_BULK: Self = Self(0x4002_0500);
    pub const AVERAGE_BASE: Self = Self(0x4003_0402);
    pub const SAMPLE_BASE: Self = Self(0x4003_0401);
    pub const RAW_BASE: Self = Self(0x4003_0403);
    pub const LARGE_RAW_BASE: Self = Self(0x4003_0500);

    const SIZE_MASK: u32 = 0x0000_0300;
    const SIZE_LARGE: u32 = 0x0000_0100;
    const DELTA_COUNTER: u32 = 0x0000_0400;
    const CALCULATION_MASK: u32 = 0x0003_0000;
    const FRACTION: u32 = 0x0002_0000;
    const BASE: u32 = 0x0003_0000;
    const NANOSECOND: u32 = 0x0010_0000;

    /// The raw type code.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// The value changes between samples and is meant to be differenced.
    pub fn is_counter(self) -> bool {
        self.0 & Self::DELTA_COUNTER == Self::DELTA_COUNTER
    }

    /// This definition is the denominator of a fraction counter.
    pub fn is_base_value(self) -> bool {
        self.0 & Self::BASE == Self::BASE
    }

    pub fn is_nanosecond_counter(self) -> bool {
        self.0 & Self::NANOSECOND == Self::NANOSECOND
    }

    /// The counter block carries a second 64-bit value after the first.
    pub fn has_second_value(self) -> bool {
        self == Self::AVERAGE_BULK
    }

    /// A fraction counter that needs a paired base definition.
    pub fn requires_base(self) -> bool {
        self.0 & Self::CALCULATION_MASK == Self::FRACTION
    }

    /// Size of the raw value in bytes, as implied by the type code.
    pub fn value_size(self) -> u32 {
        if self.0 & Self::SIZE_MASK == Self::SIZE_LARGE {
            8
        } else {
            4
        }
    }
}

impl From<u32> for CounterType {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

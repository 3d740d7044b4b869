//! Error types for performance data decoding.

use thiserror::Error;

/// Result type alias using [`PerflibError`].
pub type Result<T> = std::result::Result<T, PerflibError>;

/// A malformed or truncated performance data block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A read reached past the end of the buffer.
    #[error("read of {len} bytes at offset {offset} exceeds buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// The block does not start with the `PERF` signature.
    #[error("missing PERF signature")]
    BadSignature,

    /// A header declared a size or count that cannot be right.
    #[error("malformed {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Create a malformed-structure error.
    pub fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }
}

/// A binding declared by a record type that the data can never satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnmarshalError {
    /// `secondvalue` was requested on a counter that does not carry one.
    #[error("binding '{tag}' expects a second value, which counter '{counter}' does not carry")]
    NoSecondValue { tag: &'static str, counter: String },

    /// The binding tag carries an option other than `secondvalue`.
    #[error("binding '{tag}' has unknown option '{option}'")]
    UnknownOption { tag: &'static str, option: String },

    /// The binding tag names no counter.
    #[error("binding '{tag}' has an empty counter name")]
    EmptyCounterName { tag: &'static str },
}

/// Errors raised while obtaining or using a performance snapshot.
#[derive(Debug, Error)]
pub enum PerflibError {
    /// The raw block could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The operating system refused the query.
    #[error("{context} failed with OS error {code}")]
    Os { code: u32, context: String },

    /// The requested source is not available on this platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A collector asked for an object that is not in the snapshot.
    #[error("Performance object '{0}' not present in snapshot")]
    MissingObject(String),

    /// A record binding is invalid.
    #[error("Unmarshal error: {0}")]
    Unmarshal(#[from] UnmarshalError),
}

impl PerflibError {
    /// Create an OS error with context.
    pub fn os(code: u32, context: impl Into<String>) -> Self {
        Self::Os {
            code,
            context: context.into(),
        }
    }
}

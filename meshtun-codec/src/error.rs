//! Codec error types.

use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while parsing or framing packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer shorter than the structure being read.
    #[error("packet too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Random-position access outside the buffer contents.
    #[error("position {pos} out of bounds (len {len})")]
    OutOfBounds { pos: usize, len: usize },

    /// A header builder was handed a buffer that is not in backward mode.
    #[error("buffer must be in backward mode to prepend headers")]
    WrongDirection,

    /// Header field carries a value the parser cannot accept.
    #[error("malformed {0} header")]
    Malformed(&'static str),

    /// An IPv4 builder was given 0.0.0.0 as source or destination.
    #[error("unspecified IPv4 {0} address")]
    UnspecifiedAddress(&'static str),
}

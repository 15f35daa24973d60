//! Error types for meshtun.
//!
//! Only contract violations travel through these types. Protocol-level
//! trouble (out-of-order segments, unknown flows, odd flag combinations) is
//! answered on the wire and never surfaces as an `Err`.

use meshtun_codec::CodecError;
use thiserror::Error;

use crate::flow::FlowKey;

pub type Result<T> = std::result::Result<T, StackError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("Flow not found: {key}")]
    NotFound { key: String },

    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("Unsupported address for this engine: {0}")]
    UnsupportedAddress(String),

    #[error("Buffer must be in {expected} mode")]
    WrongBufferDirection { expected: &'static str },

    #[error("Periodic timer task needs a non-zero period")]
    InvalidPeriod,

    #[error("Registry capacity must be non-zero")]
    InvalidCapacity,

    #[error("No free control-block ids")]
    IdsExhausted,

    #[error("No free ports in {first}..={last}")]
    PortsExhausted { first: u16, last: u16 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StackError {
    pub fn not_found(key: &FlowKey) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    pub fn invalid_address(reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            reason: reason.into(),
        }
    }

    pub fn backward_required() -> Self {
        Self::WrongBufferDirection {
            expected: "backward",
        }
    }

    /// Whether the error signals a caller bug rather than a lookup miss.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

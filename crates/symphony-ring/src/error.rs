//! Error types for symphony-ring.

use thiserror::Error;

use crate::address::RingAddress;

/// Result type for symphony-ring operations.
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors raised by address construction and ring orderings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// The buffer is not exactly one address long.
    #[error("address buffer must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The buffer's class tag is not the one the caller asked for.
    #[error("address class {actual} does not match expected class {expected}")]
    ClassMismatch { expected: u32, actual: u32 },

    /// A ring ordering was handed a non-ring address.
    #[error("ring ordering requires a ring-class address, got class {class} ({address})")]
    NotRingAddress { address: RingAddress, class: u32 },

    /// The textual form was not valid hex.
    #[error("invalid address encoding: {0}")]
    InvalidEncoding(String),
}

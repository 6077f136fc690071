//! Error types for symphony-table.

use symphony_ring::RingAddress;
use thiserror::Error;

use crate::connection::MainType;

/// Result type for symphony-table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// Errors from mutating a connection list or table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// A connection to this address already exists in the partition.
    #[error("duplicate connection to {0}")]
    DuplicateAddress(RingAddress),

    /// No connection to this address exists in the partition.
    #[error("no connection to {0}")]
    UnknownAddress(RingAddress),

    /// The connection belongs to a different partition than the list.
    #[error("connection is {actual}, list holds {expected}")]
    WrongMainType { expected: MainType, actual: MainType },
}

/// Transport failures reported by an [`Edge`](crate::Edge).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EdgeError {
    /// The edge was closed underneath us.
    #[error("edge closed")]
    Closed,

    /// A failure that may succeed on retry.
    #[error("transient edge failure: {0}")]
    Transient(String),
}

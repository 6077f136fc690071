//! Error types for symphony-broadcast.

use thiserror::Error;

/// Result type for symphony-broadcast operations.
pub type Result<T> = std::result::Result<T, BroadcastError>;

/// Malformed packets and invalid arcs. Delivery failures on individual
/// edges are logged, not returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// The packet is shorter than the fixed header.
    #[error("broadcast packet truncated: {actual} bytes, header needs {needed}")]
    Truncated { actual: usize, needed: usize },

    /// The forwarder limit is negative but not the unlimited marker.
    #[error("invalid forwarder limit {0}")]
    InvalidForwarders(i32),

    /// The hop count is negative.
    #[error("invalid hop count {0}")]
    InvalidHops(i32),

    /// An address field failed to decode or is not a ring address.
    #[error(transparent)]
    Ring(#[from] symphony_ring::RingError),
}

//! Error types for symphony-overlord.

use thiserror::Error;

/// Result type for symphony-overlord operations.
pub type Result<T> = std::result::Result<T, OverlordError>;

/// Errors surfaced by overlord construction and configuration.
///
/// Steady-state work never returns these: transport failures inside the
/// overlords are logged and retried on the next heartbeat.
#[derive(Debug, Error)]
pub enum OverlordError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Ring address or ordering failure.
    #[error(transparent)]
    Ring(#[from] symphony_ring::RingError),

    /// Connection table failure.
    #[error(transparent)]
    Table(#[from] symphony_table::TableError),

    /// The configuration document could not be parsed.
    #[cfg(feature = "serde")]
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

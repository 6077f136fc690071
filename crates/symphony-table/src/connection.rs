//! Connections as seen by the topology layer.
//!
//! A [`Connection`] is created by the link layer once a handshake completes.
//! The topology core never builds one itself; it only reads them out of
//! table snapshots and asks for them to be closed.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use symphony_ring::RingAddress;

use crate::error::EdgeError;

/// Role a connection plays in the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionType {
    /// Bootstrap link used before ring membership is established.
    Leaf,
    /// Immediate ring neighbour.
    Near,
    /// Long-range small-world link.
    Shortcut,
    /// Link to the best-scoring of our logarithmic neighbours.
    Bypass,
}

impl ConnectionType {
    pub fn main_type(self) -> MainType {
        match self {
            ConnectionType::Leaf => MainType::Leaf,
            ConnectionType::Near | ConnectionType::Shortcut | ConnectionType::Bypass => {
                MainType::Structured
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Leaf => "leaf",
            ConnectionType::Near => "structured.near",
            ConnectionType::Shortcut => "structured.shortcut",
            ConnectionType::Bypass => "structured.bypass",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table partition a connection lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MainType {
    Leaf,
    /// Ring connections: near, shortcut and bypass.
    Structured,
}

impl fmt::Display for MainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MainType::Leaf => write!(f, "leaf"),
            MainType::Structured => write!(f, "structured"),
        }
    }
}

/// Who asked for a link and what ring point they were aiming at.
///
/// Shortcut audits use this to find the links this node initiated and to
/// re-run target selection around the originally sampled point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkToken {
    pub initiator: RingAddress,
    pub target: Option<RingAddress>,
}

impl LinkToken {
    pub fn new(initiator: RingAddress) -> Self {
        Self {
            initiator,
            target: None,
        }
    }

    pub fn with_target(initiator: RingAddress, target: RingAddress) -> Self {
        Self {
            initiator,
            target: Some(target),
        }
    }

    pub fn is_initiated_by(&self, address: &RingAddress) -> bool {
        self.initiator == *address
    }
}

/// A peer's advertised view of its own neighbourhood.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusMessage {
    pub neighbors: Vec<RingAddress>,
}

impl StatusMessage {
    pub fn new(neighbors: Vec<RingAddress>) -> Self {
        Self { neighbors }
    }
}

/// Transport capability behind a connection.
pub trait Edge: Send + Sync + fmt::Debug {
    /// Push a payload to the peer.
    fn send(&self, payload: Bytes) -> Result<(), EdgeError>;

    /// Ask the transport to tear the edge down. The table is updated by the
    /// link layer once the close has gone through.
    fn close(&self, reason: &str);
}

/// A live link to a peer.
#[derive(Debug, Clone)]
pub struct Connection {
    address: RingAddress,
    kind: ConnectionType,
    created_at: Instant,
    token: Option<LinkToken>,
    status: StatusMessage,
    edge: Arc<dyn Edge>,
}

impl Connection {
    pub fn new(address: RingAddress, kind: ConnectionType, edge: Arc<dyn Edge>) -> Self {
        Self {
            address,
            kind,
            created_at: Instant::now(),
            token: None,
            status: StatusMessage::default(),
            edge,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: LinkToken) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusMessage) -> Self {
        self.status = status;
        self
    }

    /// Override the creation time (simulated clocks).
    #[must_use]
    pub fn with_created_at(mut self, created_at: Instant) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn address(&self) -> &RingAddress {
        &self.address
    }

    pub fn kind(&self) -> ConnectionType {
        self.kind
    }

    pub fn main_type(&self) -> MainType {
        self.kind.main_type()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn token(&self) -> Option<&LinkToken> {
        self.token.as_ref()
    }

    pub fn status(&self) -> &StatusMessage {
        &self.status
    }

    pub fn edge(&self) -> &Arc<dyn Edge> {
        &self.edge
    }

    pub fn send(&self, payload: Bytes) -> Result<(), EdgeError> {
        self.edge.send(payload)
    }

    pub fn close(&self, reason: &str) {
        self.edge.close(reason);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.kind)
    }
}

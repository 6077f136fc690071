//! Broadcast wire header.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! | source: 20 | from: 20 | to: 20 | forwarders: i32 | hops: i32 | payload ... |
//! ```
//!
//! A forwarder limit of `-1` means every connection in the arc forwards.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use symphony_ring::{RingAddress, ADDRESS_BYTES};

use crate::error::{BroadcastError, Result};

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 3 * ADDRESS_BYTES + 4 + 4;

const UNLIMITED: i32 = -1;

/// How many connections one hop may hand the broadcast to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Forwarders {
    #[default]
    Unlimited,
    /// At most this many, always including the first node of the arc.
    Limit(u32),
}

impl Forwarders {
    pub fn to_wire(self) -> i32 {
        match self {
            Forwarders::Unlimited => UNLIMITED,
            Forwarders::Limit(n) => i32::try_from(n).unwrap_or(i32::MAX),
        }
    }

    pub fn from_wire(value: i32) -> Result<Self> {
        match value {
            UNLIMITED => Ok(Forwarders::Unlimited),
            n if n >= 0 => Ok(Forwarders::Limit(n.unsigned_abs())),
            n => Err(BroadcastError::InvalidForwarders(n)),
        }
    }
}

impl fmt::Display for Forwarders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Forwarders::Unlimited => write!(f, "unlimited"),
            Forwarders::Limit(n) => write!(f, "{n}"),
        }
    }
}

/// Per-hop broadcast state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastHeader {
    /// Node that started the broadcast.
    pub source: RingAddress,
    /// First position of the arc this hop covers (inclusive).
    pub from: RingAddress,
    /// Last position of the arc this hop covers (inclusive).
    pub to: RingAddress,
    pub forwarders: Forwarders,
    /// Hops travelled so far; the initiator sends 0.
    pub hops: u32,
}

impl BroadcastHeader {
    /// Header followed by `payload`.
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_slice(&self.source.to_bytes());
        buf.put_slice(&self.from.to_bytes());
        buf.put_slice(&self.to.to_bytes());
        buf.put_i32(self.forwarders.to_wire());
        buf.put_i32(i32::try_from(self.hops).unwrap_or(i32::MAX));
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Split a received packet into its header and payload. The returned
    /// header already counts the hop that delivered the packet.
    pub fn decode(mut packet: Bytes) -> Result<(Self, Bytes)> {
        if packet.len() < HEADER_LEN {
            return Err(BroadcastError::Truncated {
                actual: packet.len(),
                needed: HEADER_LEN,
            });
        }
        let source = RingAddress::from_bytes(&packet.split_to(ADDRESS_BYTES))?;
        let from = RingAddress::from_bytes(&packet.split_to(ADDRESS_BYTES))?;
        let to = RingAddress::from_bytes(&packet.split_to(ADDRESS_BYTES))?;
        let forwarders = Forwarders::from_wire(packet.get_i32())?;
        let hops = packet.get_i32();
        if hops < 0 {
            return Err(BroadcastError::InvalidHops(hops));
        }
        let header = Self {
            source,
            from,
            to,
            forwarders,
            hops: hops.unsigned_abs().saturating_add(1),
        };
        Ok((header, packet))
    }
}

impl fmt::Display for BroadcastHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "broadcast from {} over [{}, {}] hops={} forwarders={}",
            self.source, self.from, self.to, self.hops, self.forwarders
        )
    }
}

//! Receiving side of an arc broadcast.

use std::sync::Arc;

use bytes::Bytes;
use symphony_ring::RingAddress;
use symphony_table::ConnectionTable;
use tracing::trace;

use crate::error::Result;
use crate::header::{BroadcastHeader, Forwarders};
use crate::sender::BroadcastSender;

/// A broadcast packet delivered to this node.
///
/// The application reads the payload and the resolved arc, then calls
/// [`forward`](Self::forward) to pass the broadcast on to its sub-arc.
#[derive(Debug)]
pub struct BroadcastReceiver {
    payload: Bytes,
    sender: BroadcastSender,
}

impl BroadcastReceiver {
    pub fn parse(table: Arc<ConnectionTable>, packet: Bytes) -> Result<Self> {
        let (header, payload) = BroadcastHeader::decode(packet)?;
        trace!(local = %table.local_address(), %header, "Broadcast received");
        Ok(Self {
            payload,
            sender: BroadcastSender::continue_from(table, header),
        })
    }

    pub fn header(&self) -> &BroadcastHeader {
        self.sender.header()
    }

    pub fn source(&self) -> RingAddress {
        self.header().source
    }

    pub fn from(&self) -> RingAddress {
        self.header().from
    }

    pub fn to(&self) -> RingAddress {
        self.header().to
    }

    /// Hops travelled, including the one that delivered this packet.
    pub fn hops(&self) -> u32 {
        self.header().hops
    }

    pub fn forwarders(&self) -> Forwarders {
        self.header().forwarders
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Continue the broadcast into this node's sub-arc.
    pub fn forward(&mut self) -> Result<usize> {
        let payload = self.payload.clone();
        self.sender.send(&payload)
    }

    /// Forwarders picked by the last [`forward`](Self::forward).
    pub fn sent_to(&self) -> usize {
        self.sender.sent_to()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_ring::U160;
    use symphony_table::testing::RecordingEdge;
    use symphony_table::{Connection, ConnectionType, Edge};

    fn addr(n: u64) -> RingAddress {
        RingAddress::from_u160(U160::from_u64(n))
    }

    #[test]
    fn exposes_the_resolved_arc_and_forwards() {
        let table = Arc::new(ConnectionTable::new(addr(200)));
        let inside = RecordingEdge::new();
        let outside = RecordingEdge::new();
        for (n, edge) in [(250, &inside), (400, &outside)] {
            table
                .add(Connection::new(
                    addr(n),
                    ConnectionType::Shortcut,
                    Arc::clone(edge) as Arc<dyn Edge>,
                ))
                .unwrap();
        }

        let packet = BroadcastHeader {
            source: addr(0),
            from: addr(200),
            to: addr(298),
            forwarders: Forwarders::Limit(2),
            hops: 2,
        }
        .encode(b"payload");
        let mut receiver = BroadcastReceiver::parse(Arc::clone(&table), packet).unwrap();
        assert_eq!(receiver.source(), addr(0));
        assert_eq!(receiver.from(), addr(200));
        assert_eq!(receiver.to(), addr(298));
        assert_eq!(receiver.hops(), 3);
        assert_eq!(receiver.forwarders(), Forwarders::Limit(2));
        assert_eq!(&receiver.payload()[..], b"payload");

        assert_eq!(receiver.forward().unwrap(), 1);
        assert_eq!(receiver.sent_to(), 1);
        assert!(outside.sent().is_empty());
        let (next, payload) = BroadcastHeader::decode(inside.sent()[0].clone()).unwrap();
        assert_eq!((next.from, next.to, next.hops), (addr(250), addr(298), 4));
        assert_eq!(next.source, addr(0));
        assert_eq!(&payload[..], b"payload");
    }

    #[test]
    fn garbage_is_rejected() {
        let table = Arc::new(ConnectionTable::new(addr(0)));
        assert!(BroadcastReceiver::parse(table, Bytes::from_static(b"short")).is_err());
    }
}

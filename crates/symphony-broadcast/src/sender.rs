//! Arc partitioning and transmission.
//!
//! A hop owns the arc `[from, to]`. It hands consecutive sub-arcs to the
//! forwarders it picks from its structured connections: forwarder `i` gets
//! `[addr_i, predecessor(addr_{i+1})]` and the last one keeps `to`. The
//! sub-arcs tile the parent arc, so on a static ring every node inside it is
//! reached exactly once.

use std::sync::Arc;

use bytes::Bytes;
use symphony_ring::{AbsoluteDistanceOrder, LeftDistanceOrder, RingAddress, RingOrder};
use symphony_table::{Connection, ConnectionList, ConnectionTable, MainType};
use tracing::{debug, trace, warn};

use crate::error::{BroadcastError, Result};
use crate::header::{BroadcastHeader, Forwarders};

/// One planned transmission: who gets the payload and which arc they own.
#[derive(Debug, Clone)]
pub struct Hop {
    pub connection: Arc<Connection>,
    pub from: RingAddress,
    pub to: RingAddress,
}

/// Sends one hop of an arc broadcast.
#[derive(Debug)]
pub struct BroadcastSender {
    table: Arc<ConnectionTable>,
    header: BroadcastHeader,
    sent_to: usize,
}

impl BroadcastSender {
    /// Broadcast to the whole ring with no forwarder limit.
    pub fn new(table: Arc<ConnectionTable>) -> Self {
        Self::with_forwarders(table, Forwarders::Unlimited)
    }

    /// Broadcast to the whole ring: every position except our own.
    pub fn with_forwarders(table: Arc<ConnectionTable>, forwarders: Forwarders) -> Self {
        let local = *table.local_address();
        let header = BroadcastHeader {
            source: local,
            from: local.successor(),
            to: local.predecessor(),
            forwarders,
            hops: 0,
        };
        Self::continue_from(table, header)
    }

    /// Broadcast to the arc walked clockwise from `from` to `to`.
    pub fn for_arc(
        table: Arc<ConnectionTable>,
        from: RingAddress,
        to: RingAddress,
        forwarders: Forwarders,
    ) -> Result<Self> {
        for address in [from, to] {
            if !address.is_ring() {
                return Err(BroadcastError::Ring(symphony_ring::RingError::NotRingAddress {
                    address,
                    class: address.class(),
                }));
            }
        }
        let header = BroadcastHeader {
            source: *table.local_address(),
            from,
            to,
            forwarders,
            hops: 0,
        };
        Ok(Self::continue_from(table, header))
    }

    /// Carry on a broadcast received from another hop.
    pub fn continue_from(table: Arc<ConnectionTable>, header: BroadcastHeader) -> Self {
        Self {
            table,
            header,
            sent_to: 0,
        }
    }

    pub fn header(&self) -> &BroadcastHeader {
        &self.header
    }

    /// Forwarders picked by the last [`send`](Self::send).
    pub fn sent_to(&self) -> usize {
        self.sent_to
    }

    /// Push `payload` to this hop's forwarders over the current structured
    /// connections. Returns the number of forwarders picked; edges that fail
    /// are logged and still counted.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize> {
        let list = self.table.list(MainType::Structured);
        let hops = self.plan(&list)?;
        for hop in &hops {
            let header = BroadcastHeader {
                from: hop.from,
                to: hop.to,
                ..self.header
            };
            let packet: Bytes = header.encode(payload);
            trace!(peer = %hop.connection.address(), from = %hop.from, to = %hop.to, "Forwarding broadcast");
            if let Err(e) = hop.connection.send(packet) {
                warn!(peer = %hop.connection.address(), "Broadcast send failed: {}", e);
            }
        }
        self.sent_to = hops.len();
        debug!(
            source = %self.header.source,
            hops = self.header.hops,
            forwarders = self.sent_to,
            "Broadcast sent"
        );
        Ok(self.sent_to)
    }

    /// Pick forwarders from `list` and assign each its sub-arc, in the order
    /// they would be sent.
    pub fn plan(&self, list: &ConnectionList) -> Result<Vec<Hop>> {
        let range = self.arc_range(list);
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let selected = self.select(range)?;
        let hops = selected
            .iter()
            .enumerate()
            .map(|(i, connection)| Hop {
                connection: Arc::clone(connection),
                from: *connection.address(),
                to: selected
                    .get(i + 1)
                    .map_or(self.header.to, |next| next.address().predecessor()),
            })
            .collect();
        Ok(hops)
    }

    /// Connections inside `[from, to)` in clockwise order starting at `from`.
    /// A single-point arc holds at most the connection at that point.
    fn arc_range(&self, list: &ConnectionList) -> Vec<Arc<Connection>> {
        let BroadcastHeader { from, to, .. } = self.header;
        if from == to {
            return list.get(&from).cloned().into_iter().collect();
        }
        let start = list.index_of(&from).unwrap_or_else(|i| i);
        let mut end = list.index_of(&to).unwrap_or_else(|i| i);
        let Some(first) = list.at(start as isize) else {
            return Vec::new();
        };
        // Either the arc wraps past the top of the address space or this is
        // a leaf of the broadcast tree; only the first case holds a node.
        let first = *first.address();
        if start >= end && (first == from || first.is_between_from_left(&from, &to)) {
            end += list.len();
        }
        (start..end)
            .filter_map(|i| list.at(i as isize).cloned())
            .collect()
    }

    fn select(&self, range: Vec<Arc<Connection>>) -> Result<Vec<Arc<Connection>>> {
        let take = match self.header.forwarders {
            Forwarders::Unlimited => return Ok(range),
            Forwarders::Limit(n) => usize::try_from(n).unwrap_or(usize::MAX),
        };
        if take >= range.len() {
            return Ok(range);
        }
        let local = *self.table.local_address();
        let first = Arc::clone(&range[0]);

        let mut by_distance = range;
        AbsoluteDistanceOrder::new(local)?.sort_by_address(&mut by_distance, |c| *c.address())?;
        let mut kept = Vec::with_capacity(take.max(1));
        kept.push(Arc::clone(&first));
        kept.extend(
            by_distance
                .into_iter()
                .filter(|c| c.address() != first.address())
                .take(take.saturating_sub(1)),
        );
        LeftDistanceOrder::new(local)?.sort_by_address(&mut kept, |c| *c.address())?;
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use symphony_ring::U160;
    use symphony_table::testing::RecordingEdge;
    use symphony_table::{ConnectionType, Edge};

    fn addr(n: u64) -> RingAddress {
        RingAddress::from_u160(U160::from_u64(n))
    }

    fn table_with(local: u64, peers: &[u64]) -> (Arc<ConnectionTable>, Vec<Arc<RecordingEdge>>) {
        let table = Arc::new(ConnectionTable::new(addr(local)));
        let edges = peers
            .iter()
            .map(|&n| {
                let edge = RecordingEdge::new();
                table
                    .add(Connection::new(
                        addr(n),
                        ConnectionType::Near,
                        Arc::clone(&edge) as Arc<dyn Edge>,
                    ))
                    .unwrap();
                edge
            })
            .collect();
        (table, edges)
    }

    fn arcs(hops: &[Hop]) -> Vec<(RingAddress, RingAddress)> {
        hops.iter().map(|h| (h.from, h.to)).collect()
    }

    #[test]
    fn whole_ring_tiles_every_connection() {
        let (table, edges) = table_with(0, &[100, 200, 300, 400]);
        let mut sender = BroadcastSender::new(Arc::clone(&table));
        assert_eq!(sender.header().from, addr(2));
        assert_eq!(sender.header().to, addr(0).predecessor());

        assert_eq!(sender.send(b"hi").unwrap(), 4);
        assert_eq!(sender.sent_to(), 4);
        for edge in &edges {
            assert_eq!(edge.sent().len(), 1);
        }
        let (header, payload) = BroadcastHeader::decode(edges[1].sent()[0].clone()).unwrap();
        assert_eq!(header.source, addr(0));
        assert_eq!(header.from, addr(200));
        assert_eq!(header.to, addr(298));
        assert_eq!(header.hops, 1);
        assert_eq!(&payload[..], b"hi");

        let (last, _) = BroadcastHeader::decode(edges[3].sent()[0].clone()).unwrap();
        assert_eq!(last.to, addr(0).predecessor());
    }

    #[test]
    fn terminal_hop_sends_nothing() {
        let (table, edges) = table_with(100, &[0, 200, 300, 400]);
        let header = BroadcastHeader {
            source: addr(0),
            from: addr(100),
            to: addr(198),
            forwarders: Forwarders::Unlimited,
            hops: 1,
        };
        let mut sender = BroadcastSender::continue_from(table, header);
        assert_eq!(sender.send(b"x").unwrap(), 0);
        assert!(edges.iter().all(|e| e.sent().is_empty()));
    }

    #[test]
    fn arc_wrapping_past_the_top_is_followed() {
        let top = RingAddress::from_u160(U160::ZERO - U160::from_u64(100));
        let (table, _) = table_with(500, &[50, 300, 600]);
        table
            .add(Connection::new(top, ConnectionType::Near, RecordingEdge::new() as Arc<dyn Edge>))
            .unwrap();
        let sender = BroadcastSender::for_arc(
            Arc::clone(&table),
            top.predecessor(),
            addr(60),
            Forwarders::Unlimited,
        )
        .unwrap();
        let hops = sender.plan(&table.list(MainType::Structured)).unwrap();
        assert_eq!(arcs(&hops), vec![(top, addr(48)), (addr(50), addr(60))]);
    }

    #[test]
    fn connection_at_the_upper_bound_is_outside_the_arc() {
        let (table, _) = table_with(0, &[100, 200]);
        let sender =
            BroadcastSender::for_arc(Arc::clone(&table), addr(50), addr(200), Forwarders::Unlimited)
                .unwrap();
        let hops = sender.plan(&table.list(MainType::Structured)).unwrap();
        assert_eq!(arcs(&hops), vec![(addr(100), addr(200))]);
    }

    #[test]
    fn single_point_arc_reaches_only_that_point() {
        let (table, _) = table_with(0, &[100, 200, 300]);
        let sender = BroadcastSender::for_arc(
            Arc::clone(&table),
            addr(200),
            addr(200),
            Forwarders::Unlimited,
        )
        .unwrap();
        let hops = sender.plan(&table.list(MainType::Structured)).unwrap();
        assert_eq!(arcs(&hops), vec![(addr(200), addr(200))]);

        let sender = BroadcastSender::for_arc(
            Arc::clone(&table),
            addr(250),
            addr(250),
            Forwarders::Unlimited,
        )
        .unwrap();
        assert!(sender.plan(&table.list(MainType::Structured)).unwrap().is_empty());
    }

    #[test]
    fn bounded_fanout_keeps_the_start_and_the_nearest() {
        let (table, _) = table_with(1000, &[1100, 1200, 1300, 1400, 900, 800]);
        let sender = BroadcastSender::with_forwarders(Arc::clone(&table), Forwarders::Limit(3));
        let hops = sender.plan(&table.list(MainType::Structured)).unwrap();
        // 1100 opens the arc; 900 and 800 are the nearest of the rest.
        let picked: Vec<_> = hops.iter().map(|h| *h.connection.address()).collect();
        assert_eq!(picked, vec![addr(1100), addr(800), addr(900)]);
        assert_eq!(
            arcs(&hops),
            vec![
                (addr(1100), addr(798)),
                (addr(800), addr(898)),
                (addr(900), addr(998)),
            ]
        );
    }

    #[test]
    fn limit_covering_the_arc_sends_to_all() {
        let (table, _) = table_with(0, &[100, 200]);
        let sender = BroadcastSender::with_forwarders(Arc::clone(&table), Forwarders::Limit(5));
        let hops = sender.plan(&table.list(MainType::Structured)).unwrap();
        assert_eq!(hops.len(), 2);
    }

    #[test]
    fn failing_edges_are_still_counted() {
        let table = Arc::new(ConnectionTable::new(addr(0)));
        table
            .add(Connection::new(
                addr(100),
                ConnectionType::Near,
                RecordingEdge::broken() as Arc<dyn Edge>,
            ))
            .unwrap();
        let mut sender = BroadcastSender::new(table);
        assert_eq!(sender.send(b"x").unwrap(), 1);
    }

    #[test]
    fn non_ring_bounds_are_rejected() {
        let (table, _) = table_with(0, &[]);
        let marker = RingAddress::directional(symphony_ring::Direction::Left);
        assert!(BroadcastSender::for_arc(table, marker, addr(4), Forwarders::Unlimited).is_err());
    }

    #[test]
    fn empty_table_sends_nothing() {
        let (table, _) = table_with(0, &[]);
        let mut sender = BroadcastSender::new(table);
        assert_eq!(sender.send(b"x").unwrap(), 0);
    }

    proptest! {
        #[test]
        fn sub_arcs_tile_the_ring(
            peers in proptest::collection::btree_set(1u64..1_000_000, 0..40),
            limit in proptest::option::of(0u32..10),
        ) {
            let peers: Vec<u64> = peers.into_iter().map(|n| n * 2).collect();
            let (table, _) = table_with(0, &peers);
            let forwarders = limit.map_or(Forwarders::Unlimited, Forwarders::Limit);
            let sender = BroadcastSender::with_forwarders(Arc::clone(&table), forwarders);
            let hops = sender.plan(&table.list(MainType::Structured)).unwrap();

            let expected = match limit {
                Some(n) if (n as usize) < peers.len() => (n as usize).max(1),
                _ => peers.len(),
            };
            prop_assert_eq!(hops.len(), expected);
            if let Some(first) = hops.first() {
                prop_assert_eq!(*first.connection.address(), addr(peers[0]));
            }
            for pair in hops.windows(2) {
                prop_assert!(pair[0].from < pair[1].from);
                prop_assert_eq!(pair[0].to, pair[1].from.predecessor());
            }
            for hop in &hops {
                prop_assert_eq!(hop.from, *hop.connection.address());
            }
            if let Some(last) = hops.last() {
                prop_assert_eq!(last.to, sender.header().to);
            }
        }
    }
}

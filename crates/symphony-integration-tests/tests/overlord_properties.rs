//! Long-run properties of individual overlords and of the shortcut layer in
//! a simulated overlay.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use symphony_integration_tests::{random_addresses, SimNetwork};
use symphony_overlord::{
    is_connection_optimal, Clock, ConnectAttempt, ConnectOutcome, ConnectionOverlord, Connector,
    DoubtLedger, FinishFn, LeafConfig, LeafOverlord, ManualClock, OverlordConfig,
    OverlordContext, ScoreTable,
};
use symphony_ring::{RingAddress, U160};
use symphony_table::testing::RecordingEdge;
use symphony_table::{Connection, ConnectionTable, ConnectionType, Edge, MainType};

fn addr(n: u64) -> RingAddress {
    RingAddress::from_u160(U160::from_u64(n))
}

/// Answers every attempt with nothing.
#[derive(Debug)]
struct Unreachable;

impl Connector for Unreachable {
    fn start(&self, _attempt: ConnectAttempt, finish: FinishFn) {
        finish(ConnectOutcome::default());
    }
}

#[test]
fn leaf_trimming_never_starves_the_node() {
    let clock = Arc::new(ManualClock::new());
    let table = Arc::new(ConnectionTable::new(addr(0)));
    let ctx = OverlordContext::with_clock(
        Arc::clone(&table),
        Arc::new(Unreachable) as Arc<dyn Connector>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    let leaf = LeafOverlord::new(ctx, LeafConfig::default(), Some(99));
    leaf.start();

    let mut edges = Vec::new();
    for i in 1..=8u64 {
        let edge = RecordingEdge::new();
        table
            .add(
                Connection::new(
                    addr(i * 1000),
                    ConnectionType::Leaf,
                    Arc::clone(&edge) as Arc<dyn Edge>,
                )
                .with_created_at(clock.now()),
            )
            .unwrap();
        edges.push((addr(i * 1000), edge));
        clock.advance(Duration::from_secs(1));
    }

    let mut closed_in_order = Vec::new();
    for _ in 0..100 {
        leaf.heartbeat();
        for (address, edge) in &edges {
            if edge.is_closed() && table.remove(MainType::Leaf, address).is_ok() {
                closed_in_order.push(*address);
            }
        }
        assert!(table.count(MainType::Leaf) >= 3);
        clock.advance(Duration::from_secs(130));
    }

    assert_eq!(table.count(MainType::Leaf), 3);
    // Oldest first.
    let expected: Vec<_> = (1..=5u64).map(|i| addr(i * 1000)).collect();
    assert_eq!(closed_in_order, expected);
}

#[test]
fn doubtful_links_get_a_bounded_benefit() {
    let candidate = addr(42);
    let mut scores = ScoreTable::new();
    scores.insert(1.0, addr(10));
    scores.insert(2.0, addr(20));
    let mut ledger = DoubtLedger::new(3);

    let verdicts: Vec<bool> = (0..6)
        .map(|_| is_connection_optimal(&candidate, &scores, 1, 1.1, &mut ledger))
        .collect();
    assert_eq!(verdicts, vec![true, true, true, false, false, false]);
    assert_eq!(ledger.benefits_given(&candidate), 3);

    // Showing up with the best score clears the record.
    scores.insert(0.5, candidate);
    assert!(is_connection_optimal(&candidate, &scores, 1, 1.1, &mut ledger));
    assert_eq!(ledger.benefits_given(&candidate), 0);
}

proptest! {
    #[test]
    fn the_best_scored_candidate_is_always_kept(
        scores in proptest::collection::vec((0.0f64..100.0, any::<u32>()), 1..20),
        max_rank in 0usize..5,
    ) {
        let mut table = ScoreTable::new();
        for (score, n) in &scores {
            table.insert(*score, addr(u64::from(*n) * 2));
        }
        let best = table.best().unwrap();
        let mut ledger = DoubtLedger::new(0);
        prop_assert!(is_connection_optimal(&best, &table, max_rank, 1.1, &mut ledger));
        prop_assert!(ledger.is_empty());
    }
}

#[test]
fn shortcuts_form_once_the_ring_is_up() {
    let addresses = random_addresses(24, 31);
    let first = addresses[0];
    let mut net = SimNetwork::new();
    for (i, address) in addresses.iter().enumerate() {
        let endpoints = if i == 0 { Vec::new() } else { vec![first.to_string()] };
        let config = OverlordConfig::seeded(100 + i as u64)
            .with_leaf(LeafConfig::default().with_bootstrap(endpoints));
        net.join(*address, &config).unwrap();
        net.run(5, Duration::from_secs(1));
    }
    net.run(200, Duration::from_secs(1));

    let mut shortcuts = 0;
    for address in net.addresses() {
        let table = net.table(&address).unwrap();
        for connection in table.connections_of(ConnectionType::Shortcut) {
            shortcuts += 1;
            let token = connection.token().unwrap();
            assert!(token.target.is_some(), "shortcut without a sampled target");
            assert!(net.addresses().contains(&token.initiator));
        }
    }
    assert!(shortcuts > 0, "no shortcuts after the ring settled");
    // Shortcuts are counted once at each end.
    assert_eq!(shortcuts % 2, 0);
}

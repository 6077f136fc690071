//! Arc broadcasts reach every node in the arc exactly once.

use symphony_broadcast::Forwarders;
use symphony_integration_tests::{random_addresses, SimNetwork};
use symphony_ring::{RingAddress, U160};
use symphony_table::ConnectionType;

fn addr(n: u64) -> RingAddress {
    RingAddress::from_u160(U160::from_u64(n))
}

fn full_mesh(addresses: &[RingAddress]) -> SimNetwork {
    let mut net = SimNetwork::new();
    for a in addresses {
        net.add_node(*a);
    }
    for (i, a) in addresses.iter().enumerate() {
        for b in &addresses[i + 1..] {
            assert!(net.link(*a, *b, ConnectionType::Near, None));
        }
    }
    net
}

/// Each node linked to its `k` nearest on each side and nothing else.
fn ring(addresses: &[RingAddress], k: usize) -> SimNetwork {
    let mut sorted = addresses.to_vec();
    sorted.sort();
    let mut net = SimNetwork::new();
    for a in &sorted {
        net.add_node(*a);
    }
    for (i, a) in sorted.iter().enumerate() {
        for step in 1..=k {
            let b = sorted[(i + step) % sorted.len()];
            net.link(*a, b, ConnectionType::Near, None);
        }
    }
    net
}

#[test]
fn five_nodes_everyone_but_the_source() {
    symphony_logging::init_for_tests();
    let nodes: Vec<_> = [0, 100, 200, 300, 400].into_iter().map(addr).collect();
    let net = full_mesh(&nodes);

    let report = net
        .broadcast(&addr(0), Forwarders::Unlimited, b"hello ring")
        .unwrap();
    for n in &nodes[1..] {
        assert_eq!(report.received(n), 1, "node {n}");
    }
    assert_eq!(report.received(&addr(0)), 0);
    assert_eq!(report.duplicates(), 0);
    assert_eq!(report.max_hops, 1);
}

#[test]
fn bounded_fanout_over_a_full_mesh() {
    let nodes = random_addresses(50, 7);
    let net = full_mesh(&nodes);

    for forwarders in [Forwarders::Limit(1), Forwarders::Limit(3), Forwarders::Unlimited] {
        let report = net.broadcast(&nodes[0], forwarders, b"x").unwrap();
        for n in &nodes[1..] {
            assert_eq!(report.received(n), 1, "node {n} with {forwarders} forwarders");
        }
        assert_eq!(report.received(&nodes[0]), 0);
    }
}

#[test]
fn bounded_fanout_recurses() {
    let nodes = random_addresses(50, 11);
    let net = full_mesh(&nodes);
    let report = net.broadcast(&nodes[3], Forwarders::Limit(3), b"x").unwrap();
    assert_eq!(report.deliveries.len(), 49);
    assert!(report.max_hops > 1);
}

#[test]
fn ring_topology_is_covered_hop_by_hop() {
    let nodes = random_addresses(30, 3);
    let net = ring(&nodes, 2);

    for forwarders in [Forwarders::Unlimited, Forwarders::Limit(2)] {
        for source in [nodes[0], nodes[17]] {
            let report = net.broadcast(&source, forwarders, b"x").unwrap();
            assert_eq!(report.deliveries.len(), 29);
            assert_eq!(report.duplicates(), 0);
            assert_eq!(report.received(&source), 0);
        }
    }
}

#[test]
fn sub_arc_reaches_only_the_arc() {
    let mut nodes = random_addresses(40, 5);
    nodes.sort();
    let net = full_mesh(&nodes);

    let from = nodes[5];
    let to = nodes[15].predecessor();
    for forwarders in [Forwarders::Unlimited, Forwarders::Limit(3)] {
        let report = net
            .broadcast_arc(&nodes[30], from, to, forwarders, b"x")
            .unwrap();
        for (i, n) in nodes.iter().enumerate() {
            let expected = usize::from((5..15).contains(&i));
            assert_eq!(report.received(n), expected, "node {i}");
        }
    }
}

#[test]
fn single_point_arc_reaches_one_node() {
    let mut nodes = random_addresses(10, 13);
    nodes.sort();
    let net = full_mesh(&nodes);

    let report = net
        .broadcast_arc(&nodes[0], nodes[4], nodes[4], Forwarders::Unlimited, b"x")
        .unwrap();
    assert_eq!(report.deliveries.len(), 1);
    assert_eq!(report.received(&nodes[4]), 1);
    assert_eq!(report.received(&nodes[0]), 0);
    assert_eq!(report.duplicates(), 0);
}

#[test]
fn payload_survives_every_hop() {
    let nodes = random_addresses(20, 9);
    let net = ring(&nodes, 1);
    let report = net
        .broadcast(&nodes[0], Forwarders::Unlimited, &[7u8; 300])
        .unwrap();
    assert_eq!(report.deliveries.len(), 19);
    // The last node is reached directly; the rest form a chain.
    assert_eq!(report.max_hops, 18);
}

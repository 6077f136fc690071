//! Nodes joining one at a time through a single bootstrap node end up
//! stitched between their true ring neighbours, and stay that way as
//! nodes crash.

use std::time::Duration;

use symphony_integration_tests::{random_addresses, SimNetwork};
use symphony_overlord::{LeafConfig, OverlordConfig, ShortcutConfig};
use symphony_ring::RingAddress;
use symphony_table::{ConnectionType, MainType};

const TICK: Duration = Duration::from_secs(1);

fn config(seed: u64, bootstrap: Option<RingAddress>) -> OverlordConfig {
    let endpoints = bootstrap.map(|a| vec![a.to_string()]).unwrap_or_default();
    OverlordConfig::seeded(seed)
        .with_leaf(LeafConfig::default().with_bootstrap(endpoints))
        // Ring only: no shortcut candidates compete with near links.
        .with_shortcut(ShortcutConfig {
            min_network_size: usize::MAX,
            ..Default::default()
        })
}

fn grow(addresses: &[RingAddress], rounds_per_join: usize) -> SimNetwork {
    let mut net = SimNetwork::new();
    let first = addresses[0];
    for (i, address) in addresses.iter().enumerate() {
        let bootstrap = (i > 0).then_some(first);
        net.join(*address, &config(i as u64, bootstrap)).unwrap();
        net.run(rounds_per_join, TICK);
    }
    net
}

fn assert_settled(net: &SimNetwork) {
    assert!(net.ring_is_consistent(), "ring has a gap: {net:?}");
    for address in net.addresses() {
        let set = net.overlords(&address).unwrap();
        assert!(set.is_connected(), "{address} does not hold its place");
        assert!(!set.near.need_left_neighbor(), "{address} lacks left neighbours");
        assert!(!set.near.need_right_neighbor(), "{address} lacks right neighbours");
    }
}

#[test]
fn sequential_joins_form_a_ring() {
    symphony_logging::init_for_tests();
    let addresses = random_addresses(12, 21);
    let net = grow(&addresses, 10);
    net.run(60, TICK);
    assert_settled(&net);

    for address in net.addresses() {
        assert!(net.connections_of(&address, ConnectionType::Shortcut).is_empty());
        let table = net.table(&address).unwrap();
        assert!(table.count(MainType::Structured) >= 4);
    }
}

#[test]
fn ring_survives_crashes() {
    let addresses = random_addresses(12, 22);
    let mut net = grow(&addresses, 10);
    net.run(60, TICK);
    assert!(net.ring_is_consistent());

    let mut sorted = addresses.clone();
    sorted.sort();
    // Two crashes far apart on the ring.
    net.remove_node(&sorted[3]);
    net.remove_node(&sorted[9]);
    net.run(60, TICK);

    assert_eq!(net.addresses().len(), 10);
    assert_settled(&net);
}

#[test]
fn two_nodes_pair_up() {
    let addresses = random_addresses(2, 23);
    let net = grow(&addresses, 20);
    assert!(net.ring_is_consistent());
    let [a, b] = [addresses[0], addresses[1]];
    assert_eq!(net.connections_of(&a, ConnectionType::Near), vec![b]);
    assert_eq!(net.connections_of(&b, ConnectionType::Near), vec![a]);
    assert!(net.overlords(&a).unwrap().is_connected());
}

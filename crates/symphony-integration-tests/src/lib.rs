//! Cross-crate scenarios for the Symphony overlay.
//!
//! [`SimNetwork`] runs many nodes in one process with a stepped clock and
//! plays the link layer for them. The scenarios themselves live in `tests/`.

mod network;

pub use network::{BroadcastReport, SimNetwork, STATUS_SIZE};

use rand::rngs::StdRng;
use rand::SeedableRng;
use symphony_ring::RingAddress;

/// `count` distinct random ring addresses, reproducible from `seed`.
pub fn random_addresses(count: usize, seed: u64) -> Vec<RingAddress> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out: Vec<RingAddress> = Vec::with_capacity(count);
    while out.len() < count {
        let address = RingAddress::random(&mut rng);
        if !out.contains(&address) {
            out.push(address);
        }
    }
    out
}

//! Overlay size estimation from neighbour density.
//!
//! Near neighbours sit on both sides of us at roughly the average node
//! spacing, so the width of the arc they span divided by their count is the
//! inverse density of the ring. Scaling up to the whole address space gives
//! the estimate.

use symphony_ring::{RingAddress, RingDistance, U160};

use crate::connection::ConnectionType;
use crate::list::ConnectionList;

/// Full ring circumference as a float.
fn full_ring() -> f64 {
    U160::HALF.to_f64() * 2.0
}

/// Estimate the number of nodes in the overlay.
///
/// Never less than the number of structured connections plus ourselves.
pub fn estimate_network_size(local: &RingAddress, structured: &ConnectionList) -> usize {
    let lower_bound = structured.len() + 1;

    let mut least: Option<RingDistance> = None;
    let mut greatest: Option<RingDistance> = None;
    let mut near = 0usize;
    for connection in structured.iter().filter(|c| c.kind() == ConnectionType::Near) {
        let d = local.distance_to(connection.address());
        least = Some(least.map_or(d, |l| l.min(d)));
        greatest = Some(greatest.map_or(d, |g| g.max(d)));
        near += 1;
    }

    let (Some(least), Some(greatest)) = (least, greatest) else {
        return lower_bound;
    };
    if greatest <= least {
        return lower_bound;
    }
    let width = greatest.to_f64() - least.to_f64();
    let estimate = full_ring() * near as f64 / width;
    if estimate.is_finite() && estimate > lower_bound as f64 {
        estimate.min(usize::MAX as f64) as usize
    } else {
        lower_bound
    }
}

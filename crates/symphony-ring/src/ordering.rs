//! Orderings of ring addresses relative to a reference point.
//!
//! These are used to rank candidates (absolute distance) and to lay out
//! broadcast forwarders in walk order (clockwise distance). Every ordering is
//! total: positions at equal distance are tie-broken by raw address.
//!
//! Only ring-class addresses have a meaningful position, so feeding a
//! directional marker to an ordering is a [`RingError::NotRingAddress`].

use std::cmp::Ordering;

use crate::address::RingAddress;
use crate::error::{Result, RingError};
use crate::u160::U160;

fn check_ring(address: &RingAddress) -> Result<()> {
    if address.is_ring() {
        Ok(())
    } else {
        Err(RingError::NotRingAddress {
            address: *address,
            class: address.class(),
        })
    }
}

/// A total order over ring addresses anchored at a reference address.
pub trait RingOrder {
    /// The anchor every distance is measured from.
    fn reference(&self) -> &RingAddress;

    /// Sort key of `address`; smaller keys come first.
    fn key(&self, address: &RingAddress) -> U160;

    /// Compare two addresses, rejecting non-ring input.
    fn compare(&self, a: &RingAddress, b: &RingAddress) -> Result<Ordering> {
        check_ring(a)?;
        check_ring(b)?;
        Ok(self.key(a).cmp(&self.key(b)).then_with(|| a.cmp(b)))
    }

    /// Sort addresses in place.
    fn sort(&self, addresses: &mut [RingAddress]) -> Result<()>
    where
        Self: Sized,
    {
        self.sort_by_address(addresses, |a| *a)
    }

    /// Sort arbitrary items by the address `address_of` extracts.
    fn sort_by_address<T, F>(&self, items: &mut [T], address_of: F) -> Result<()>
    where
        Self: Sized,
        F: Fn(&T) -> RingAddress,
    {
        for item in items.iter() {
            check_ring(&address_of(item))?;
        }
        items.sort_by_cached_key(|item| {
            let address = address_of(item);
            (self.key(&address), address)
        });
        Ok(())
    }
}

/// Orders by absolute ring distance from the reference.
#[derive(Debug, Clone, Copy)]
pub struct AbsoluteDistanceOrder {
    reference: RingAddress,
}

impl AbsoluteDistanceOrder {
    pub fn new(reference: RingAddress) -> Result<Self> {
        check_ring(&reference)?;
        Ok(Self { reference })
    }
}

impl RingOrder for AbsoluteDistanceOrder {
    fn reference(&self) -> &RingAddress {
        &self.reference
    }

    fn key(&self, address: &RingAddress) -> U160 {
        self.reference.distance_to(address).abs()
    }
}

/// Orders by clockwise distance from the reference.
#[derive(Debug, Clone, Copy)]
pub struct LeftDistanceOrder {
    reference: RingAddress,
}

impl LeftDistanceOrder {
    pub fn new(reference: RingAddress) -> Result<Self> {
        check_ring(&reference)?;
        Ok(Self { reference })
    }
}

impl RingOrder for LeftDistanceOrder {
    fn reference(&self) -> &RingAddress {
        &self.reference
    }

    fn key(&self, address: &RingAddress) -> U160 {
        self.reference.left_distance_to(address)
    }
}

/// Orders by counter-clockwise distance from the reference.
#[derive(Debug, Clone, Copy)]
pub struct RightDistanceOrder {
    reference: RingAddress,
}

impl RightDistanceOrder {
    pub fn new(reference: RingAddress) -> Result<Self> {
        check_ring(&reference)?;
        Ok(Self { reference })
    }
}

impl RingOrder for RightDistanceOrder {
    fn reference(&self) -> &RingAddress {
        &self.reference
    }

    fn key(&self, address: &RingAddress) -> U160 {
        self.reference.right_distance_to(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Direction;

    fn addr(n: u64) -> RingAddress {
        RingAddress::from_u160(U160::from_u64(n))
    }

    #[test]
    fn absolute_order_ranks_by_nearness() {
        let order = AbsoluteDistanceOrder::new(addr(1000)).unwrap();
        let far_back = RingAddress::from_u160(U160::ZERO - U160::from_u64(10));
        let mut v = vec![addr(5000), far_back, addr(990), addr(1020)];
        order.sort(&mut v).unwrap();
        assert_eq!(v, vec![addr(990), addr(1020), far_back, addr(5000)]);
    }

    #[test]
    fn left_order_walks_clockwise() {
        let order = LeftDistanceOrder::new(addr(1000)).unwrap();
        let mut v = vec![addr(500), addr(1500), addr(1002)];
        order.sort(&mut v).unwrap();
        assert_eq!(v, vec![addr(1002), addr(1500), addr(500)]);
    }

    #[test]
    fn right_order_walks_counter_clockwise() {
        let order = RightDistanceOrder::new(addr(1000)).unwrap();
        let mut v = vec![addr(500), addr(1500), addr(998)];
        order.sort(&mut v).unwrap();
        assert_eq!(v, vec![addr(998), addr(500), addr(1500)]);
    }

    #[test]
    fn equidistant_positions_tie_break_by_address() {
        let order = AbsoluteDistanceOrder::new(addr(1000)).unwrap();
        assert_eq!(order.compare(&addr(990), &addr(1010)), Ok(Ordering::Less));
        assert_eq!(order.compare(&addr(1010), &addr(990)), Ok(Ordering::Greater));
    }

    #[test]
    fn directional_input_is_rejected() {
        let marker = RingAddress::directional(Direction::Left);
        assert!(matches!(
            AbsoluteDistanceOrder::new(marker),
            Err(RingError::NotRingAddress { .. })
        ));
        let order = LeftDistanceOrder::new(addr(0)).unwrap();
        assert!(order.compare(&addr(2), &marker).is_err());
        let mut v = vec![addr(2), marker];
        assert!(order.sort(&mut v).is_err());
    }
}

//! Symphony Ring Addressing
//!
//! The circular 160-bit identifier space every overlay participant lives on.
//!
//! # Geometry
//!
//! The ring has circumference `Full = 2^160`. Every pair of positions has
//! three displacements:
//!
//! - clockwise ("left") distance in `[0, Full)`
//! - counter-clockwise ("right") distance in `[0, Full)`
//! - the shortest signed distance in `(-Half, Half]`
//!
//! Raw-bit ordering (`Ord` on [`RingAddress`]) is kept separate from ring
//! distance. Sorted connection lists use raw order; candidate ranking and
//! broadcast layout use the distance orderings in [`ordering`].

mod address;
mod distance;
mod error;
pub mod ordering;
mod u160;

pub use address::{Direction, RingAddress, DIRECTIONAL_CLASS, RING_CLASS};
pub use distance::RingDistance;
pub use error::{Result, RingError};
pub use ordering::{AbsoluteDistanceOrder, LeftDistanceOrder, RightDistanceOrder, RingOrder};
pub use u160::U160;

/// Address width in bits.
pub const ADDRESS_BITS: u32 = u160::BITS;

/// Address width in bytes.
pub const ADDRESS_BYTES: usize = u160::BYTES;

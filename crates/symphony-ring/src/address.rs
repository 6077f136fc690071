//! Ring addresses and the wraparound metric.
//!
//! # Class tags
//!
//! The class of an address is the number of trailing one bits in its
//! big-endian buffer. Ring (unicast) addresses are class 0, i.e. always even,
//! which is why neighbouring ring positions are two apart. Directional marker
//! addresses are class [`DIRECTIONAL_CLASS`].
//!
//! # Orientation
//!
//! "Left" is the clockwise direction, toward increasing addresses; "right" is
//! toward decreasing addresses. `a.is_left_of(b)` holds when `a` lies within
//! half a ring clockwise of `b`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::distance::RingDistance;
use crate::error::{Result, RingError};
use crate::u160::{U160, BYTES};

/// Class tag of unicast ring addresses.
pub const RING_CLASS: u32 = 0;

/// Class tag of directional marker addresses.
pub const DIRECTIONAL_CLASS: u32 = 124;

/// Travel direction along the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Clockwise, toward increasing addresses.
    Left,
    /// Counter-clockwise, toward decreasing addresses.
    Right,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
        }
    }
}

/// An immutable position on the 160-bit ring.
///
/// Equality and `Ord` are over the raw bits. Ring geometry is exposed through
/// [`distance_to`](Self::distance_to) and friends, never through `Ord`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RingAddress {
    value: U160,
}

impl RingAddress {
    /// Encoded size in bytes.
    pub const MEM_SIZE: usize = BYTES;

    /// Parse a ring-class address from a big-endian buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with_class(bytes, RING_CLASS)
    }

    /// Parse an address, insisting on the given class tag.
    pub fn from_bytes_with_class(bytes: &[u8], expected: u32) -> Result<Self> {
        if bytes.len() != BYTES {
            return Err(RingError::InvalidLength {
                expected: BYTES,
                actual: bytes.len(),
            });
        }
        let mut buf = [0u8; BYTES];
        buf.copy_from_slice(bytes);
        let value = U160::from_be_bytes(&buf);
        let actual = value.trailing_ones();
        if actual != expected {
            return Err(RingError::ClassMismatch { expected, actual });
        }
        Ok(Self { value })
    }

    /// Ring address nearest below `value` (the class bit is cleared).
    pub fn from_u160(value: U160) -> Self {
        Self::with_class(value, RING_CLASS)
    }

    /// Address carrying `class`, keeping the high bits of `value`.
    pub fn with_class(value: U160, class: u32) -> Self {
        Self {
            value: apply_class(value, class),
        }
    }

    /// Marker address for a directional request.
    pub fn directional(direction: Direction) -> Self {
        let base = match direction {
            Direction::Left => U160::HALF,
            Direction::Right => U160::ZERO,
        };
        Self::with_class(base, DIRECTIONAL_CLASS)
    }

    /// Derive a ring identity from a public key.
    pub fn from_public_key(key: &[u8]) -> Self {
        let hash = blake3::hash(key);
        let mut buf = [0u8; BYTES];
        buf.copy_from_slice(&hash.as_bytes()[..BYTES]);
        Self::from_u160(U160::from_be_bytes(&buf))
    }

    /// Uniformly random ring address.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut buf = [0u8; BYTES];
        rng.fill(&mut buf[..]);
        Self::from_u160(U160::from_be_bytes(&buf))
    }

    pub fn value(&self) -> U160 {
        self.value
    }

    pub fn to_bytes(&self) -> [u8; BYTES] {
        self.value.to_be_bytes()
    }

    pub fn class(&self) -> u32 {
        self.value.trailing_ones()
    }

    pub fn is_ring(&self) -> bool {
        self.class() == RING_CLASS
    }

    /// Direction encoded by a directional marker address.
    pub fn direction(&self) -> Option<Direction> {
        if self.class() != DIRECTIONAL_CLASS {
            return None;
        }
        if self.value.bit(159) {
            Some(Direction::Left)
        } else {
            Some(Direction::Right)
        }
    }

    /// Shortest signed displacement from `self` to `other`, in `(-Half, Half]`.
    pub fn distance_to(&self, other: &RingAddress) -> RingDistance {
        RingDistance::from_clockwise(self.left_distance_to(other))
    }

    /// Clockwise displacement from `self` to `other`, in `[0, Full)`.
    pub fn left_distance_to(&self, other: &RingAddress) -> U160 {
        other.value.wrapping_sub(self.value)
    }

    /// Counter-clockwise displacement from `self` to `other`, in `[0, Full)`.
    pub fn right_distance_to(&self, other: &RingAddress) -> U160 {
        self.value.wrapping_sub(other.value)
    }

    /// True when `self` lies clockwise of `other` (within half a ring).
    pub fn is_left_of(&self, other: &RingAddress) -> bool {
        other.distance_to(self).is_positive()
    }

    /// True when `self` lies counter-clockwise of `other` (within half a ring).
    pub fn is_right_of(&self, other: &RingAddress) -> bool {
        other.distance_to(self).is_negative()
    }

    /// Strictly inside the arc walked clockwise from `start` to `end`.
    pub fn is_between_from_left(&self, start: &RingAddress, end: &RingAddress) -> bool {
        let span = start.left_distance_to(end);
        let offset = start.left_distance_to(self);
        !offset.is_zero() && offset < span
    }

    /// Strictly inside the arc walked counter-clockwise from `start` to `end`.
    pub fn is_between_from_right(&self, start: &RingAddress, end: &RingAddress) -> bool {
        let span = start.right_distance_to(end);
        let offset = start.right_distance_to(self);
        !offset.is_zero() && offset < span
    }

    /// Inside the closed arc walked clockwise from `from` to `to`.
    pub fn is_in_arc(&self, from: &RingAddress, to: &RingAddress) -> bool {
        from.left_distance_to(self) <= from.left_distance_to(to)
    }

    /// Is `first` strictly nearer to `self` than `second`?
    ///
    /// Equidistant candidates give `false` in both argument orders. The top
    /// 32 bits of each address bound the true distances to within one prefix
    /// unit, so most comparisons finish without touching the low limbs.
    pub fn is_closer_to_first(&self, first: &RingAddress, second: &RingAddress) -> bool {
        if first == second {
            return false;
        }
        let local = self.value.prefix_u32();
        let wf = prefix_distance(local, first.value.prefix_u32());
        let ws = prefix_distance(local, second.value.prefix_u32());
        if wf + 2 <= ws {
            return true;
        }
        if ws + 2 <= wf {
            return false;
        }
        self.is_closer_to_first_exact(first, second)
    }

    /// Full-precision version of [`is_closer_to_first`](Self::is_closer_to_first).
    pub fn is_closer_to_first_exact(&self, first: &RingAddress, second: &RingAddress) -> bool {
        self.distance_to(first).abs() < self.distance_to(second).abs()
    }

    /// Next ring position clockwise (two steps, class preserved).
    pub fn successor(&self) -> RingAddress {
        Self {
            value: self.value.wrapping_add(U160::from_u64(2)),
        }
    }

    /// Next ring position counter-clockwise (two steps, class preserved).
    pub fn predecessor(&self) -> RingAddress {
        Self {
            value: self.value.wrapping_sub(U160::from_u64(2)),
        }
    }

    /// Displace by `delta` in `direction` and re-apply this address's class.
    pub fn offset_by(&self, delta: U160, direction: Direction) -> RingAddress {
        let moved = match direction {
            Direction::Left => self.value.wrapping_add(delta),
            Direction::Right => self.value.wrapping_sub(delta),
        };
        Self::with_class(moved, self.class())
    }
}

/// Circular distance between two 32-bit prefixes.
fn prefix_distance(a: u32, b: u32) -> u64 {
    let d = u64::from(b.wrapping_sub(a));
    d.min((1u64 << 32) - d)
}

fn apply_class(value: U160, class: u32) -> U160 {
    let class = class.min(crate::u160::BITS - 1);
    let cleared = (value >> (class + 1)) << (class + 1);
    let ones = (U160::ONE << class).wrapping_sub(U160::ONE);
    cleared.wrapping_add(ones)
}

impl fmt::Display for RingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring:{}", self.value)
    }
}

impl fmt::Debug for RingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingAddress({})", self.value)
    }
}

impl FromStr for RingAddress {
    type Err = RingError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("ring:").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| RingError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

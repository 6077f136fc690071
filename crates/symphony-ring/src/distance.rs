//! Signed ring displacement.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Neg;

use crate::u160::U160;

/// Shortest signed displacement between two ring positions.
///
/// Values lie in `(-Half, Half]`: positive means clockwise (toward increasing
/// addresses), negative counter-clockwise. A displacement of exactly half the
/// ring is reported as positive.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingDistance {
    magnitude: U160,
    negative: bool,
}

impl RingDistance {
    /// No displacement.
    pub const ZERO: RingDistance = RingDistance {
        magnitude: U160::ZERO,
        negative: false,
    };

    /// Signed displacement equivalent to the clockwise displacement `clockwise`.
    pub fn from_clockwise(clockwise: U160) -> Self {
        if clockwise <= U160::HALF {
            RingDistance {
                magnitude: clockwise,
                negative: false,
            }
        } else {
            RingDistance {
                magnitude: clockwise.wrapping_neg(),
                negative: true,
            }
        }
    }

    /// Absolute value, always in `[0, Half]`.
    pub fn abs(&self) -> U160 {
        self.magnitude
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_positive(&self) -> bool {
        !self.negative && !self.magnitude.is_zero()
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    /// Back to a clockwise displacement in `[0, Full)`.
    pub fn to_clockwise(&self) -> U160 {
        if self.negative {
            self.magnitude.wrapping_neg()
        } else {
            self.magnitude
        }
    }

    /// Lossy conversion to floating point, keeping the sign.
    pub fn to_f64(&self) -> f64 {
        let m = self.magnitude.to_f64();
        if self.negative {
            -m
        } else {
            m
        }
    }
}

impl Neg for RingDistance {
    type Output = RingDistance;

    /// `-Half` is not representable, so negating `Half` yields `Half`.
    fn neg(self) -> RingDistance {
        RingDistance::from_clockwise(self.to_clockwise().wrapping_neg())
    }
}

impl Ord for RingDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, false) => self.magnitude.cmp(&other.magnitude),
            (true, true) => other.magnitude.cmp(&self.magnitude),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }
    }
}

impl PartialOrd for RingDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for RingDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative { "-" } else { "+" };
        write!(f, "RingDistance({sign}0x{})", self.magnitude)
    }
}

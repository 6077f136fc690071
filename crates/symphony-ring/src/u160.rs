//! Fixed-width 160-bit unsigned arithmetic.
//!
//! All arithmetic wraps modulo `2^160`, which is exactly the ring
//! circumference, so `a - b` is the clockwise displacement from `b` to `a`.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Shl, Shr, Sub};

/// Width of a ring value in bits.
pub const BITS: u32 = 160;

/// Width of the big-endian byte encoding.
pub const BYTES: usize = 20;

/// Limb 2 only carries the top 32 bits.
const TOP_MASK: u64 = 0xFFFF_FFFF;

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// A 160-bit unsigned integer.
///
/// Represented as 3 u64 limbs in little-endian order. Limb 0 is least
/// significant; only the low 32 bits of limb 2 are ever set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct U160 {
    limbs: [u64; 3],
}

impl U160 {
    /// Zero value
    pub const ZERO: U160 = U160 { limbs: [0, 0, 0] };

    /// One
    pub const ONE: U160 = U160 { limbs: [1, 0, 0] };

    /// Maximum value (2^160 - 1)
    pub const MAX: U160 = U160 {
        limbs: [u64::MAX, u64::MAX, TOP_MASK],
    };

    /// 2^159, half of the ring.
    pub const HALF: U160 = U160 {
        limbs: [0, 0, 1 << 31],
    };

    /// Create from a u64 (placed in lowest limb)
    pub const fn from_u64(n: u64) -> Self {
        U160 { limbs: [n, 0, 0] }
    }

    /// Create from a u128 (placed in lowest two limbs)
    pub const fn from_u128(n: u128) -> Self {
        U160 {
            limbs: [n as u64, (n >> 64) as u64, 0],
        }
    }

    /// Create from 20 bytes (big-endian)
    pub fn from_be_bytes(bytes: &[u8; BYTES]) -> Self {
        let mut top = [0u8; 4];
        let mut mid = [0u8; 8];
        let mut low = [0u8; 8];
        top.copy_from_slice(&bytes[0..4]);
        mid.copy_from_slice(&bytes[4..12]);
        low.copy_from_slice(&bytes[12..20]);
        U160 {
            limbs: [
                u64::from_be_bytes(low),
                u64::from_be_bytes(mid),
                u64::from(u32::from_be_bytes(top)),
            ],
        }
    }

    /// Convert to 20 bytes (big-endian)
    pub fn to_be_bytes(&self) -> [u8; BYTES] {
        let mut bytes = [0u8; BYTES];
        bytes[0..4].copy_from_slice(&(self.limbs[2] as u32).to_be_bytes());
        bytes[4..12].copy_from_slice(&self.limbs[1].to_be_bytes());
        bytes[12..20].copy_from_slice(&self.limbs[0].to_be_bytes());
        bytes
    }

    /// Check if zero
    pub fn is_zero(&self) -> bool {
        self.limbs == [0, 0, 0]
    }

    /// The most significant 32 bits.
    pub fn prefix_u32(&self) -> u32 {
        self.limbs[2] as u32
    }

    /// The least significant 64 bits.
    pub fn low_u64(&self) -> u64 {
        self.limbs[0]
    }

    /// Test bit `i` (0 is least significant).
    pub fn bit(&self, i: u32) -> bool {
        if i >= BITS {
            return false;
        }
        (self.limbs[(i / 64) as usize] >> (i % 64)) & 1 == 1
    }

    /// Number of consecutive one bits starting at the least significant bit.
    pub fn trailing_ones(&self) -> u32 {
        let mut count = 0;
        for (i, limb) in self.limbs.iter().enumerate() {
            let ones = limb.trailing_ones();
            count += ones;
            if ones < 64 || i == 2 {
                break;
            }
        }
        count.min(BITS)
    }

    /// Addition modulo 2^160.
    pub fn wrapping_add(self, other: U160) -> U160 {
        let mut result = [0u64; 3];
        let mut carry = 0u128;

        for (i, slot) in result.iter_mut().enumerate() {
            let sum = self.limbs[i] as u128 + other.limbs[i] as u128 + carry;
            *slot = sum as u64;
            carry = sum >> 64;
        }
        result[2] &= TOP_MASK;

        U160 { limbs: result }
    }

    /// Subtraction modulo 2^160.
    pub fn wrapping_sub(self, other: U160) -> U160 {
        let mut result = [0u64; 3];
        let mut borrow = 0u64;

        for (i, slot) in result.iter_mut().enumerate() {
            let (d1, b1) = self.limbs[i].overflowing_sub(other.limbs[i]);
            let (d2, b2) = d1.overflowing_sub(borrow);
            *slot = d2;
            borrow = u64::from(b1 || b2);
        }
        result[2] &= TOP_MASK;

        U160 { limbs: result }
    }

    /// Two's complement negation modulo 2^160.
    pub fn wrapping_neg(self) -> U160 {
        U160::ZERO.wrapping_sub(self)
    }

    /// Lossy conversion to floating point.
    pub fn to_f64(&self) -> f64 {
        (self.limbs[2] as f64) * TWO_POW_64 * TWO_POW_64
            + (self.limbs[1] as f64) * TWO_POW_64
            + self.limbs[0] as f64
    }

    /// Base-2 logarithm, `None` for zero.
    pub fn log2(&self) -> Option<f64> {
        if self.is_zero() {
            None
        } else {
            Some(self.to_f64().log2())
        }
    }

    /// Nearest representable value to `2^exponent`.
    ///
    /// Keeps 53 bits of precision. Negative (or NaN) exponents give zero and
    /// exponents at or past 160 saturate to [`U160::MAX`].
    pub fn from_pow2(exponent: f64) -> U160 {
        if exponent.is_nan() || exponent < 0.0 {
            return U160::ZERO;
        }
        if exponent >= f64::from(BITS) {
            return U160::MAX;
        }
        let whole = exponent.floor();
        let frac = exponent - whole;
        let whole = whole as u32;
        // 2^frac in [1, 2) scaled to a 53-bit integer mantissa
        let mantissa = ((frac.exp2() * (1u64 << 52) as f64) as u64).min((1u64 << 53) - 1);
        if whole >= 52 {
            U160::from_u64(mantissa) << (whole - 52)
        } else {
            U160::from_u64(mantissa >> (52 - whole))
        }
    }
}

impl Ord for U160 {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare from most significant limb
        for i in (0..3).rev() {
            match self.limbs[i].cmp(&other.limbs[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for U160 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for U160 {
    type Output = U160;

    fn add(self, rhs: U160) -> U160 {
        self.wrapping_add(rhs)
    }
}

impl Sub for U160 {
    type Output = U160;

    fn sub(self, rhs: U160) -> U160 {
        self.wrapping_sub(rhs)
    }
}

impl Neg for U160 {
    type Output = U160;

    fn neg(self) -> U160 {
        self.wrapping_neg()
    }
}

impl Shl<u32> for U160 {
    type Output = U160;

    fn shl(self, bits: u32) -> U160 {
        if bits >= BITS {
            return U160::ZERO;
        }
        let limb_shift = (bits / 64) as usize;
        let bit_shift = bits % 64;
        let mut result = [0u64; 3];
        for i in (limb_shift..3).rev() {
            let src = i - limb_shift;
            let mut v = self.limbs[src] << bit_shift;
            if bit_shift > 0 && src > 0 {
                v |= self.limbs[src - 1] >> (64 - bit_shift);
            }
            result[i] = v;
        }
        result[2] &= TOP_MASK;
        U160 { limbs: result }
    }
}

impl Shr<u32> for U160 {
    type Output = U160;

    fn shr(self, bits: u32) -> U160 {
        if bits >= BITS {
            return U160::ZERO;
        }
        let limb_shift = (bits / 64) as usize;
        let bit_shift = bits % 64;
        let mut result = [0u64; 3];
        for (i, slot) in result.iter_mut().enumerate().take(3 - limb_shift) {
            let src = i + limb_shift;
            let mut v = self.limbs[src] >> bit_shift;
            if bit_shift > 0 && src + 1 < 3 {
                v |= self.limbs[src + 1] << (64 - bit_shift);
            }
            *slot = v;
        }
        U160 { limbs: result }
    }
}

impl From<u64> for U160 {
    fn from(n: u64) -> Self {
        U160::from_u64(n)
    }
}

impl From<u128> for U160 {
    fn from(n: u128) -> Self {
        U160::from_u128(n)
    }
}

impl fmt::Display for U160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Debug for U160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U160(0x{})", hex::encode(self.to_be_bytes()))
    }
}

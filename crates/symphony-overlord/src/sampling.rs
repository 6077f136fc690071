//! Harmonic shortcut-length sampling.
//!
//! With `k` nodes spread over a ring of `2^L` positions, drawing
//! `p ~ U(0, 1)` and displacing by `2^(L - (1 - p) log2 k)` gives
//! `P(d) ∝ 1/d` between the mean node spacing and the whole ring.

use rand::Rng;
use symphony_ring::{Direction, RingAddress, ADDRESS_BITS, U160};

/// Displacement for a uniform draw `p` in a network of `k` nodes.
pub fn harmonic_displacement(p: f64, network_size: usize) -> U160 {
    let log_k = (network_size.max(1) as f64).log2();
    let exponent = f64::from(ADDRESS_BITS) - (1.0 - p) * log_k;
    U160::from_pow2(exponent)
}

/// Sample a shortcut target around `local`, in a random direction.
pub fn sample_shortcut_target<R: Rng + ?Sized>(
    local: &RingAddress,
    network_size: usize,
    rng: &mut R,
) -> RingAddress {
    let p: f64 = rng.gen();
    let direction = if rng.gen_bool(0.5) {
        Direction::Left
    } else {
        Direction::Right
    };
    local.offset_by(harmonic_displacement(p, network_size), direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn extremes_of_the_draw() {
        // p = 0 lands on the mean spacing, p -> 1 on the whole ring.
        let d = harmonic_displacement(0.0, 1024);
        assert_eq!(d, U160::from_pow2(150.0));
        let d = harmonic_displacement(1.0, 1024);
        assert_eq!(d, U160::MAX);
    }

    #[test]
    fn log_displacement_is_uniform() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let k = 1000usize;
        let low = f64::from(ADDRESS_BITS) - (k as f64).log2();
        let high = f64::from(ADDRESS_BITS);
        let bins = 10usize;
        let mut counts = vec![0usize; bins];
        for _ in 0..10_000 {
            let p: f64 = rng.gen();
            let d = harmonic_displacement(p, k).log2().unwrap();
            assert!(d >= low - 1e-6 && d <= high, "log2 displacement {d} out of range");
            let bin = (((d - low) / (high - low)) * bins as f64) as usize;
            counts[bin.min(bins - 1)] += 1;
        }
        for (i, c) in counts.iter().enumerate() {
            assert!((800..=1200).contains(c), "bin {i} has {c} samples");
        }
    }

    #[test]
    fn targets_keep_ring_class() {
        let mut rng = StdRng::seed_from_u64(9);
        let local = RingAddress::random(&mut rng);
        for _ in 0..100 {
            let target = sample_shortcut_target(&local, 5000, &mut rng);
            assert!(target.is_ring());
            assert_ne!(target, local);
        }
    }

    #[test]
    fn both_directions_are_sampled() {
        let mut rng = StdRng::seed_from_u64(21);
        let local = RingAddress::from_u160(U160::ZERO);
        let (mut left, mut right) = (0, 0);
        for _ in 0..200 {
            let target = sample_shortcut_target(&local, 1 << 20, &mut rng);
            if target.is_left_of(&local) {
                left += 1;
            } else {
                right += 1;
            }
        }
        assert!(left > 50 && right > 50, "left {left}, right {right}");
    }
}

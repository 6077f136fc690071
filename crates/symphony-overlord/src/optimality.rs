//! Near-optimality test for audited shortcut and bypass links.

use std::collections::HashMap;

use symphony_ring::RingAddress;
use tracing::trace;

use crate::selector::ScoreTable;

/// Per-address count of consecutive audits that found no score.
///
/// A link whose candidate is missing from the score table is kept for
/// `max_benefits` audits in a row. After that the entry stays saturated, so
/// every further doubtful audit reports the link as non-optimal.
#[derive(Debug, Clone, Default)]
pub struct DoubtLedger {
    max_benefits: u32,
    given: HashMap<RingAddress, u32>,
}

impl DoubtLedger {
    pub fn new(max_benefits: u32) -> Self {
        Self {
            max_benefits,
            given: HashMap::new(),
        }
    }

    /// Benefits already granted to `address`.
    pub fn benefits_given(&self, address: &RingAddress) -> u32 {
        self.given.get(address).copied().unwrap_or(0)
    }

    /// Drop any record for `address`.
    pub fn forget(&mut self, address: &RingAddress) {
        self.given.remove(address);
    }

    pub fn len(&self) -> usize {
        self.given.len()
    }

    pub fn is_empty(&self) -> bool {
        self.given.is_empty()
    }

    /// Grant one more benefit if the quota allows.
    fn grant(&mut self, address: &RingAddress) -> bool {
        let given = self.given.entry(*address).or_insert(0);
        if *given < self.max_benefits {
            *given += 1;
            true
        } else {
            false
        }
    }
}

/// Highest rank still eligible as near-optimal for a table of `len` entries.
pub fn max_rank_for(len: usize, fraction: f64) -> usize {
    (fraction * len as f64).ceil() as usize
}

/// Is `candidate` good enough to keep, given fresh scores?
///
/// An empty table says nothing, so the link stays. Rank 0 is optimal. Ranks
/// up to `max_rank` are optimal while their score stays within `tolerance`
/// of the best. Absent candidates draw on the [`DoubtLedger`].
pub fn is_connection_optimal(
    candidate: &RingAddress,
    scores: &ScoreTable,
    max_rank: usize,
    tolerance: f64,
    ledger: &mut DoubtLedger,
) -> bool {
    if scores.is_empty() {
        trace!(candidate = %candidate, "No scores to judge optimality");
        return true;
    }

    let mut doubtful = false;
    let mut optimal = match scores.rank_of(candidate) {
        None => {
            doubtful = true;
            false
        }
        Some(0) => true,
        Some(rank) if rank <= max_rank => {
            match (scores.score_at(rank), scores.best_score()) {
                (Some(score), Some(best)) if best > 0.0 => score / best < tolerance,
                (Some(score), Some(best)) => score <= best,
                _ => false,
            }
        }
        Some(rank) => {
            trace!(candidate = %candidate, rank, "Candidate ranked too low");
            false
        }
    };

    if optimal {
        ledger.forget(candidate);
    } else if doubtful {
        optimal = ledger.grant(candidate);
        trace!(
            candidate = %candidate,
            given = ledger.benefits_given(candidate),
            granted = optimal,
            "Candidate has no score"
        );
    } else {
        ledger.forget(candidate);
    }
    optimal
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_ring::U160;

    fn addr(n: u64) -> RingAddress {
        RingAddress::from_u160(U160::from_u64(n))
    }

    fn table(scores: &[(f64, u64)]) -> ScoreTable {
        scores.iter().map(|&(s, a)| (s, addr(a))).collect()
    }

    #[test]
    fn empty_table_is_optimal() {
        let mut ledger = DoubtLedger::new(2);
        assert!(is_connection_optimal(&addr(2), &ScoreTable::new(), 0, 1.1, &mut ledger));
        assert!(ledger.is_empty());
    }

    #[test]
    fn rank_and_tolerance() {
        let mut ledger = DoubtLedger::new(2);
        let scores = table(&[
            (10.0, 2),
            (10.5, 4),
            (12.0, 6),
            (13.0, 8),
            (14.0, 10),
            (15.0, 12),
            (16.0, 14),
            (17.0, 16),
            (18.0, 18),
            (19.0, 20),
        ]);
        let max_rank = max_rank_for(scores.len(), 0.2);
        assert_eq!(max_rank, 2);
        assert!(is_connection_optimal(&addr(2), &scores, max_rank, 1.1, &mut ledger));
        // Within rank and within 10%.
        assert!(is_connection_optimal(&addr(4), &scores, max_rank, 1.1, &mut ledger));
        // Within rank, 20% worse.
        assert!(!is_connection_optimal(&addr(6), &scores, max_rank, 1.1, &mut ledger));
        // Out of rank.
        assert!(!is_connection_optimal(&addr(8), &scores, max_rank, 1.1, &mut ledger));
        // Rank 0 only.
        assert!(!is_connection_optimal(&addr(4), &scores, 0, 1.1, &mut ledger));
        assert!(ledger.is_empty());
    }

    #[test]
    fn non_positive_best_score() {
        let mut ledger = DoubtLedger::new(2);
        let scores = table(&[(0.0, 2), (0.0, 4), (1.0, 6)]);
        assert!(is_connection_optimal(&addr(4), &scores, 1, 1.1, &mut ledger));
        assert!(!is_connection_optimal(&addr(6), &scores, 2, 1.1, &mut ledger));
    }

    #[test]
    fn doubt_runs_out_after_max_benefits() {
        let mut ledger = DoubtLedger::new(2);
        let scores = table(&[(1.0, 2), (2.0, 4)]);
        let missing = addr(100);
        assert!(is_connection_optimal(&missing, &scores, 1, 1.1, &mut ledger));
        assert!(is_connection_optimal(&missing, &scores, 1, 1.1, &mut ledger));
        for _ in 0..3 {
            assert!(!is_connection_optimal(&missing, &scores, 1, 1.1, &mut ledger));
        }
        assert_eq!(ledger.benefits_given(&missing), 2);
    }

    #[test]
    fn reappearing_clears_doubt() {
        let mut ledger = DoubtLedger::new(2);
        let missing = addr(100);
        let without = table(&[(1.0, 2)]);
        let with = table(&[(1.0, 100), (2.0, 2)]);
        assert!(is_connection_optimal(&missing, &without, 0, 1.1, &mut ledger));
        assert!(is_connection_optimal(&missing, &with, 0, 1.1, &mut ledger));
        assert_eq!(ledger.benefits_given(&missing), 0);
        assert!(is_connection_optimal(&missing, &without, 0, 1.1, &mut ledger));
        assert!(is_connection_optimal(&missing, &without, 0, 1.1, &mut ledger));
        assert!(!is_connection_optimal(&missing, &without, 0, 1.1, &mut ledger));
    }
}

//! Ranking of shortcut candidates around a sampled ring point.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use symphony_ring::RingAddress;
use tracing::{debug, trace};

/// Candidates ranked by score, lowest (best) first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    entries: Vec<(f64, RingAddress)>,
}

impl ScoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding one trivially ranked address.
    pub fn single(address: RingAddress) -> Self {
        let mut table = Self::new();
        table.insert(0.0, address);
        table
    }

    /// Add or re-score `address`.
    pub fn insert(&mut self, score: f64, address: RingAddress) {
        self.entries.retain(|(_, a)| *a != address);
        let at = self
            .entries
            .partition_point(|(s, a)| s.total_cmp(&score).then_with(|| a.cmp(&address)).is_lt());
        self.entries.insert(at, (score, address));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn best(&self) -> Option<RingAddress> {
        self.entries.first().map(|(_, a)| *a)
    }

    pub fn best_score(&self) -> Option<f64> {
        self.entries.first().map(|(s, _)| *s)
    }

    /// Zero-based rank of `address`.
    pub fn rank_of(&self, address: &RingAddress) -> Option<usize> {
        self.entries.iter().position(|(_, a)| a == address)
    }

    pub fn score_at(&self, rank: usize) -> Option<f64> {
        self.entries.get(rank).map(|(s, _)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, RingAddress)> + '_ {
        self.entries.iter().copied()
    }
}

impl FromIterator<(f64, RingAddress)> for ScoreTable {
    fn from_iter<I: IntoIterator<Item = (f64, RingAddress)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (score, address) in iter {
            table.insert(score, address);
        }
        table
    }
}

/// What a selector hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidates {
    /// The ring point the request was made for.
    pub start: RingAddress,
    pub table: ScoreTable,
    /// The connection being audited, if any.
    pub current: Option<RingAddress>,
}

pub type SelectorCallback = Box<dyn FnOnce(Candidates) + Send>;

/// Produces a ranked candidate table for a ring point.
///
/// The callback is invoked exactly once and may run before
/// `compute_candidates` returns.
pub trait TargetSelector: Send + Sync + fmt::Debug {
    fn compute_candidates(
        &self,
        start: RingAddress,
        count: usize,
        current: Option<RingAddress>,
        callback: SelectorCallback,
    );
}

/// Ranks nothing: returns `current`, or `start` when there is no current.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTargetSelector;

impl TargetSelector for DefaultTargetSelector {
    fn compute_candidates(
        &self,
        start: RingAddress,
        _count: usize,
        current: Option<RingAddress>,
        callback: SelectorCallback,
    ) {
        callback(Candidates {
            start,
            table: ScoreTable::single(current.unwrap_or(start)),
            current,
        });
    }
}

/// Measurement completion: a score, or `None` when the candidate didn't answer.
pub type MeasureFn = Box<dyn FnOnce(Option<f64>) + Send>;

/// Source of candidate addresses and their scores (latency, coordinate
/// distance and the like).
pub trait CandidateProbe: Send + Sync + fmt::Debug {
    /// Up to `count` nodes at or just clockwise of `start`.
    fn candidates_near(&self, start: &RingAddress, count: usize) -> Vec<RingAddress>;

    /// Score one candidate. Lower is better.
    fn measure(&self, candidate: RingAddress, done: MeasureFn);
}

/// Rounds allowed in flight at once.
pub const MAX_CONCURRENT_ROUNDS: usize = 5;

/// Share of the requested candidates whose scores end a round early.
const EARLY_FINISH_FRACTION: f64 = 0.75;

struct Round {
    start: RingAddress,
    current: Option<RingAddress>,
    table: ScoreTable,
    outstanding: usize,
    enough: usize,
    callback: Option<SelectorCallback>,
}

/// Scores candidates through a [`CandidateProbe`].
///
/// A round measures every candidate near the start point and finishes once
/// all measurements are in or three quarters of the requested count have
/// scored. When [`MAX_CONCURRENT_ROUNDS`] are already running, the request
/// is answered with the unranked fallback instead.
pub struct ProbingTargetSelector<P> {
    local: RingAddress,
    probe: Arc<P>,
    in_flight: Arc<Mutex<usize>>,
}

impl<P: CandidateProbe + 'static> ProbingTargetSelector<P> {
    pub fn new(local: RingAddress, probe: Arc<P>) -> Self {
        Self {
            local,
            probe,
            in_flight: Arc::new(Mutex::new(0)),
        }
    }

    pub fn rounds_in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    fn fallback(start: RingAddress, current: Option<RingAddress>, callback: SelectorCallback) {
        DefaultTargetSelector.compute_candidates(start, 1, current, callback);
    }
}

impl<P> fmt::Debug for ProbingTargetSelector<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbingTargetSelector")
            .field("local", &self.local)
            .field("in_flight", &*self.in_flight.lock())
            .finish()
    }
}

fn finish_round(round: &Mutex<Round>, in_flight: &Mutex<usize>) {
    let done = {
        let mut round = round.lock();
        round.callback.take().map(|cb| {
            let candidates = Candidates {
                start: round.start,
                table: std::mem::take(&mut round.table),
                current: round.current,
            };
            (cb, candidates)
        })
    };
    if let Some((callback, candidates)) = done {
        {
            let mut n = in_flight.lock();
            *n = n.saturating_sub(1);
        }
        debug!(
            start = %candidates.start,
            scored = candidates.table.len(),
            "Candidate round finished"
        );
        callback(candidates);
    }
}

impl<P: CandidateProbe + 'static> TargetSelector for ProbingTargetSelector<P> {
    fn compute_candidates(
        &self,
        start: RingAddress,
        count: usize,
        current: Option<RingAddress>,
        callback: SelectorCallback,
    ) {
        {
            let mut n = self.in_flight.lock();
            if *n >= MAX_CONCURRENT_ROUNDS {
                drop(n);
                trace!(start = %start, "Too many candidate rounds, using fallback");
                Self::fallback(start, current, callback);
                return;
            }
            *n += 1;
        }

        let candidates: Vec<RingAddress> = self
            .probe
            .candidates_near(&start, count)
            .into_iter()
            .filter(|a| *a != self.local)
            .collect();
        let enough = ((count as f64 * EARLY_FINISH_FRACTION).ceil() as usize).max(1);
        let round = Arc::new(Mutex::new(Round {
            start,
            current,
            table: ScoreTable::new(),
            outstanding: candidates.len(),
            enough,
            callback: Some(callback),
        }));

        if candidates.is_empty() {
            finish_round(&round, &self.in_flight);
            return;
        }

        for candidate in candidates {
            let round = Arc::clone(&round);
            let in_flight = Arc::clone(&self.in_flight);
            self.probe.measure(
                candidate,
                Box::new(move |score| {
                    let finished = {
                        let mut r = round.lock();
                        r.outstanding = r.outstanding.saturating_sub(1);
                        if let Some(score) = score {
                            if r.callback.is_some() {
                                r.table.insert(score, candidate);
                            }
                        }
                        r.outstanding == 0 || r.table.len() >= r.enough
                    };
                    if finished {
                        finish_round(&round, &in_flight);
                    }
                }),
            );
        }
    }
}

//! Long-range shortcut and bypass connections.
//!
//! Shortcuts are drawn from a harmonic distance distribution so that greedy
//! routing takes `O(log n)` hops. The bypass links the node to the best
//! scoring of its own neighbourhood. Both are audited periodically against
//! fresh scores from the [`TargetSelector`] and replaced when clearly beaten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use symphony_ring::RingAddress;
use symphony_table::{
    Connection, ConnectionList, ConnectionType, LinkToken, MainType, TableEvent, TableEventKind,
};
use tracing::{debug, trace};

use crate::backoff::RetryTimer;
use crate::config::ShortcutConfig;
use crate::connector::{ConnectAttempt, ConnectTarget, Route};
use crate::optimality::{is_connection_optimal, max_rank_for, DoubtLedger};
use crate::overlord::{overlord_rng, ConnectionOverlord, OverlordContext};
use crate::sampling::sample_shortcut_target;
use crate::selector::{Candidates, DefaultTargetSelector, TargetSelector};

const RNG_SALT: u64 = 0x5c07;

/// Trim bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShortcutStats {
    pub trims: u64,
    /// Mean age of trimmed links.
    pub mean_lifetime: Duration,
    /// Trims per second since the overlord was created.
    pub trim_rate: f64,
}

struct ShortcutState {
    retry: RetryTimer,
    last_connection_event: Instant,
    last_optimize: Instant,
    need_shortcut: Option<bool>,
    need_bypass: Option<bool>,
    /// A create round is waiting on the selector or the connector.
    pending: bool,
    doubts: DoubtLedger,
    trims: u64,
    trimmed_lifetime: Duration,
    rng: StdRng,
}

struct Inner {
    ctx: OverlordContext,
    config: ShortcutConfig,
    active: AtomicBool,
    created_at: Instant,
    selector: RwLock<Arc<dyn TargetSelector>>,
    ring_gate: RwLock<Option<Arc<dyn ConnectionOverlord>>>,
    state: Mutex<ShortcutState>,
}

/// Maintains the node's shortcut and bypass links.
#[derive(Clone)]
pub struct ShortcutOverlord {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Shortcut,
    Bypass,
}

impl ShortcutOverlord {
    pub fn new(ctx: OverlordContext, config: ShortcutConfig, seed: Option<u64>) -> Self {
        let now = ctx.now();
        let state = ShortcutState {
            retry: RetryTimer::new(config.retry),
            last_connection_event: now,
            last_optimize: now,
            need_shortcut: None,
            need_bypass: None,
            pending: false,
            doubts: DoubtLedger::new(config.max_doubt_benefits),
            trims: 0,
            trimmed_lifetime: Duration::ZERO,
            rng: overlord_rng(seed, RNG_SALT),
        };
        Self {
            inner: Arc::new(Inner {
                ctx,
                config,
                active: AtomicBool::new(false),
                created_at: now,
                selector: RwLock::new(Arc::new(DefaultTargetSelector)),
                ring_gate: RwLock::new(None),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn set_target_selector(&self, selector: Arc<dyn TargetSelector>) {
        *self.inner.selector.write() = selector;
    }

    /// Only seek shortcuts while `ring` reports the node as connected.
    pub fn set_ring_gate(&self, ring: Arc<dyn ConnectionOverlord>) {
        *self.inner.ring_gate.write() = Some(ring);
    }

    /// `ceil(0.5 log2 n)` once the estimated size exceeds the minimum.
    pub fn desired_shortcuts(&self) -> usize {
        self.inner.desired_shortcuts()
    }

    pub fn need_bypass(&self) -> bool {
        self.inner.need_bypass()
    }

    pub fn has_pending_round(&self) -> bool {
        self.inner.state.lock().pending
    }

    pub fn stats(&self) -> ShortcutStats {
        let state = self.inner.state.lock();
        let elapsed = self
            .inner
            .ctx
            .now()
            .saturating_duration_since(self.inner.created_at)
            .as_secs_f64();
        ShortcutStats {
            trims: state.trims,
            mean_lifetime: if state.trims > 0 {
                state.trimmed_lifetime / u32::try_from(state.trims).unwrap_or(u32::MAX)
            } else {
                Duration::ZERO
            },
            trim_rate: if elapsed > 0.0 {
                state.trims as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

impl Inner {
    fn local(&self) -> RingAddress {
        self.ctx.local()
    }

    fn k(&self) -> usize {
        self.config.desired_neighbors
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn selector(&self) -> Arc<dyn TargetSelector> {
        Arc::clone(&self.selector.read())
    }

    fn desired_shortcuts(&self) -> usize {
        let n = self.ctx.table.network_size();
        if n > self.config.min_network_size {
            (0.5 * (n as f64).log2()).ceil() as usize
        } else {
            0
        }
    }

    /// Candidates requested from the selector: about `log2 n`.
    fn candidate_count(&self) -> usize {
        let n = self.ctx.table.network_size().max(2);
        ((n as f64).log2().ceil() as usize).max(1)
    }

    /// Far enough from us on both sides not to double as a near neighbour.
    fn is_long_range(&self, structs: &ConnectionList, address: &RingAddress) -> bool {
        let local = self.local();
        structs.left_inclusive_count(&local, address) >= self.k()
            && structs.right_inclusive_count(&local, address) >= self.k()
    }

    fn need_shortcut(&self) -> bool {
        let desired = self.desired_shortcuts();
        if desired == 0 {
            return false;
        }
        let structs = self.ctx.table.list(MainType::Structured);
        if structs.len() < 2 * self.k() + desired {
            return true;
        }
        let mut state = self.state.lock();
        if let Some(need) = state.need_shortcut {
            return need;
        }
        let shortcuts = structs
            .iter()
            .filter(|c| c.kind() == ConnectionType::Shortcut)
            .filter(|c| self.is_long_range(&structs, c.address()))
            .count();
        let need = shortcuts < desired;
        state.need_shortcut = Some(need);
        need
    }

    fn need_bypass(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(need) = state.need_bypass {
            return need;
        }
        let need = self.ctx.table.count_of(ConnectionType::Bypass) == 0;
        state.need_bypass = Some(need);
        need
    }

    fn ring_ready(&self) -> bool {
        match self.ring_gate.read().as_ref() {
            Some(ring) => ring.is_connected(),
            None => true,
        }
    }

    fn activate(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let now = self.ctx.now();
        {
            let mut state = self.state.lock();
            if state.pending || !state.retry.try_begin(now) {
                return;
            }
        }
        if !self.ring_ready() {
            trace!(local = %self.local(), "Not on the ring yet, no shortcuts");
            return;
        }
        if self.need_shortcut() {
            self.create(Purpose::Shortcut);
        } else if self.need_bypass() {
            self.create(Purpose::Bypass);
        }
    }

    /// Claim the round slot and ask the selector for candidates.
    fn create(self: &Arc<Self>, purpose: Purpose) {
        let local = self.local();
        let start = {
            let mut state = self.state.lock();
            if state.pending {
                return;
            }
            state.pending = true;
            match purpose {
                Purpose::Shortcut => {
                    sample_shortcut_target(&local, self.ctx.table.network_size(), &mut state.rng)
                }
                Purpose::Bypass => local,
            }
        };
        debug!(local = %local, start = %start, purpose = ?purpose, "Selecting link target");
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.selector().compute_candidates(
            start,
            self.candidate_count(),
            None,
            Box::new(move |candidates| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_candidates(purpose, candidates);
                }
            }),
        );
    }

    /// A shortcut is routed greedily only when the selector found nobody
    /// better than the sampled point itself; a concrete candidate is routed
    /// exactly.
    fn on_candidates(self: &Arc<Self>, purpose: Purpose, candidates: Candidates) {
        let local = self.local();
        let best = candidates.table.best().filter(|b| *b != local);
        let Some(best) = best.filter(|_| self.is_active()) else {
            self.state.lock().pending = false;
            return;
        };
        let (route, kind, token) = match purpose {
            Purpose::Shortcut => {
                // The selector only echoed our sampled point: route greedily
                // to whoever owns it.
                let route = if best == candidates.start {
                    Route::Greedy(best)
                } else {
                    Route::Exact(best)
                };
                (
                    route,
                    ConnectionType::Shortcut,
                    LinkToken::with_target(local, candidates.start),
                )
            }
            Purpose::Bypass => (
                Route::Exact(best),
                ConnectionType::Bypass,
                LinkToken::new(local),
            ),
        };
        debug!(local = %local, target = %best, kind = %kind, "Connecting");
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.ctx.connector.start(
            ConnectAttempt {
                target: ConnectTarget::Route(route),
                kind,
                token,
                wanted_responses: 1,
            },
            Box::new(move |_outcome| {
                if let Some(inner) = weak.upgrade() {
                    inner.state.lock().pending = false;
                }
            }),
        );
    }

    fn touch(&self) {
        let now = self.ctx.now();
        let mut state = self.state.lock();
        state.last_connection_event = now;
        state.need_shortcut = None;
        state.need_bypass = None;
        state.retry.reset();
    }

    fn on_disconnected(self: &Arc<Self>, event: &TableEvent) {
        self.touch();
        let connection = &event.connection;
        self.state.lock().doubts.forget(connection.address());
        if !self.is_active() || connection.main_type() != MainType::Structured {
            return;
        }
        match connection.kind() {
            ConnectionType::Shortcut if self.need_shortcut() => self.create(Purpose::Shortcut),
            ConnectionType::Bypass if self.need_bypass() => self.create(Purpose::Bypass),
            _ => {}
        }
    }

    fn record_trim(&self, connection: &Connection) {
        let age = self
            .ctx
            .now()
            .saturating_duration_since(connection.created_at());
        let mut state = self.state.lock();
        state.trims += 1;
        state.trimmed_lifetime += age;
    }

    fn self_initiated(&self, kind: ConnectionType) -> Vec<Arc<Connection>> {
        let local = self.local();
        self.ctx
            .table
            .connections_of(kind)
            .into_iter()
            .filter(|c| c.token().is_some_and(|t| t.is_initiated_by(&local)))
            .collect()
    }

    fn check_optimality(self: &Arc<Self>) {
        let now = self.ctx.now();
        let audited = {
            let mut state = self.state.lock();
            if now.saturating_duration_since(state.last_optimize) < self.config.optimize_interval {
                return;
            }
            state.last_optimize = now;
            let shortcuts: Vec<_> = self
                .self_initiated(ConnectionType::Shortcut)
                .into_iter()
                .filter(|c| c.token().and_then(|t| t.target).is_some())
                .collect();
            shortcuts.choose(&mut state.rng).cloned()
        };
        let count = self.candidate_count();
        let selector = self.selector();

        if let Some(shortcut) = audited {
            if let Some(start) = shortcut.token().and_then(|t| t.target) {
                debug!(local = %self.local(), peer = %shortcut.address(), "Auditing shortcut");
                let weak: Weak<Inner> = Arc::downgrade(self);
                let current = *shortcut.address();
                selector.compute_candidates(
                    start,
                    count,
                    Some(current),
                    Box::new(move |candidates| {
                        if let Some(inner) = weak.upgrade() {
                            inner.check_shortcut(current, candidates);
                        }
                    }),
                );
            }
        } else {
            trace!(local = %self.local(), "No self-initiated shortcut to audit");
        }

        let weak: Weak<Inner> = Arc::downgrade(self);
        selector.compute_candidates(
            self.local(),
            count,
            None,
            Box::new(move |candidates| {
                if let Some(inner) = weak.upgrade() {
                    inner.check_bypass(candidates);
                }
            }),
        );
    }

    fn judge(&self, address: &RingAddress, candidates: &Candidates, max_rank: usize) -> bool {
        let mut state = self.state.lock();
        is_connection_optimal(
            address,
            &candidates.table,
            max_rank,
            self.config.score_tolerance,
            &mut state.doubts,
        )
    }

    fn check_shortcut(&self, address: RingAddress, candidates: Candidates) {
        let max_rank = max_rank_for(candidates.table.len(), self.config.optimal_rank_fraction);
        if self.judge(&address, &candidates, max_rank) {
            trace!(peer = %address, "Shortcut still optimal");
            return;
        }
        let to_trim = self
            .self_initiated(ConnectionType::Shortcut)
            .into_iter()
            .find(|c| *c.address() == address);
        if let Some(c) = to_trim {
            debug!(
                local = %self.local(),
                peer = %address,
                best = ?candidates.table.best(),
                "Trimming suboptimal shortcut"
            );
            self.record_trim(&c);
            c.close("shortcut: not optimal");
        }
    }

    fn check_bypass(&self, candidates: Candidates) {
        let bypasses = self.self_initiated(ConnectionType::Bypass);
        let max_rank = if bypasses.len() > 1 {
            0
        } else {
            max_rank_for(candidates.table.len(), self.config.optimal_rank_fraction)
        };
        for bypass in bypasses {
            if self.judge(bypass.address(), &candidates, max_rank) {
                continue;
            }
            debug!(
                local = %self.local(),
                peer = %bypass.address(),
                best = ?candidates.table.best(),
                "Trimming suboptimal bypass"
            );
            self.record_trim(&bypass);
            bypass.close("bypass: not optimal");
        }
    }

    fn trim(&self) {
        let desired = self.desired_shortcuts();
        if self.ctx.table.count_of(ConnectionType::Shortcut) <= 2 * desired {
            return;
        }
        let now = self.ctx.now();
        {
            let state = self.state.lock();
            if now.saturating_duration_since(state.last_connection_event) < self.config.trim_delay {
                return;
            }
        }
        let structs = self.ctx.table.list(MainType::Structured);
        let candidates: Vec<_> = structs
            .iter()
            .filter(|c| c.kind() == ConnectionType::Shortcut)
            .filter(|c| self.is_long_range(&structs, c.address()))
            .cloned()
            .collect();
        if candidates.len() <= 2 * desired {
            return;
        }
        let pick = candidates.choose(&mut self.state.lock().rng).cloned();
        if let Some(c) = pick {
            debug!(
                local = %self.local(),
                peer = %c.address(),
                shortcuts = candidates.len(),
                desired,
                "Trimming surplus shortcut"
            );
            self.record_trim(&c);
            c.close("shortcut: surplus");
        }
    }

    fn heartbeat(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        self.check_optimality();
        self.trim();
        if self.need_shortcut() || self.need_bypass() {
            self.activate();
        }
    }
}

impl std::fmt::Debug for ShortcutOverlord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ShortcutOverlord")
            .field("local", &self.inner.ctx.local())
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .field("pending", &state.pending)
            .field("doubts", &state.doubts.len())
            .field("trims", &state.trims)
            .finish()
    }
}

impl ConnectionOverlord for ShortcutOverlord {
    fn name(&self) -> &'static str {
        "shortcut"
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Release);
    }

    fn need_connection(&self) -> bool {
        self.inner.need_shortcut()
    }

    /// Shortcuts are an optimisation; the node works without them.
    fn is_connected(&self) -> bool {
        true
    }

    fn activate(&self) {
        self.inner.activate();
    }

    fn handle_event(&self, event: &TableEvent) {
        match event.kind {
            TableEventKind::Connected => self.inner.touch(),
            TableEventKind::Disconnected => self.inner.on_disconnected(event),
            TableEventKind::StatusChanged => {}
        }
    }

    fn heartbeat(&self) {
        self.inner.heartbeat();
    }
}

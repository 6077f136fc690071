//! Immediate ring neighbours.
//!
//! The near overlord keeps `k` neighbours on each side of the local address.
//! It joins the ring by asking a leaf to route a connect-to request at the
//! local address, then keeps tightening the neighbourhood from the neighbour
//! lists its peers advertise. Redundant near links are trimmed once the
//! topology has been quiet for a while.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use symphony_ring::{Direction, RingAddress, U160};
use symphony_table::{
    ConnectionList, ConnectionType, LinkToken, MainType, TableEvent, TableEventKind,
};
use tracing::{debug, trace};

use crate::backoff::RetryTimer;
use crate::config::NearConfig;
use crate::connector::{ConnectAttempt, ConnectOutcome, ConnectTarget, Route};
use crate::overlord::{overlord_rng, ConnectionOverlord, OverlordContext};

const RNG_SALT: u64 = 0x4ea4;

struct NearState {
    retry: RetryTimer,
    last_connection_event: Instant,
    need_left: Option<bool>,
    need_right: Option<bool>,
    /// An activation round is waiting on the connector.
    round_pending: bool,
    /// Targets of reactive attempts still in flight.
    in_flight: HashSet<RingAddress>,
    rng: StdRng,
}

struct Inner {
    ctx: OverlordContext,
    config: NearConfig,
    active: AtomicBool,
    state: Mutex<NearState>,
}

/// Keeps the node stitched into the ring between its nearest neighbours.
#[derive(Clone)]
pub struct NearOverlord {
    inner: Arc<Inner>,
}

/// Whether an attempt belongs to the activation round or is a reactive
/// connect keyed on its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Round,
    Keyed(RingAddress),
}

impl NearOverlord {
    pub fn new(ctx: OverlordContext, config: NearConfig, seed: Option<u64>) -> Self {
        let now = ctx.now();
        let state = NearState {
            retry: RetryTimer::new(config.retry),
            last_connection_event: now,
            need_left: None,
            need_right: None,
            round_pending: false,
            in_flight: HashSet::new(),
            rng: overlord_rng(seed, RNG_SALT),
        };
        Self {
            inner: Arc::new(Inner {
                ctx,
                config,
                active: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
        }
    }

    /// Fewer than `k` structured links among our `k` clockwise neighbours.
    pub fn need_left_neighbor(&self) -> bool {
        self.inner.need_side(Direction::Left)
    }

    /// Fewer than `k` structured links among our `k` counter-clockwise neighbours.
    pub fn need_right_neighbor(&self) -> bool {
        self.inner.need_side(Direction::Right)
    }

    pub fn has_pending_round(&self) -> bool {
        self.inner.state.lock().round_pending
    }

    pub fn attempts_in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }
}

impl Inner {
    fn k(&self) -> usize {
        self.config.desired_neighbors
    }

    fn local(&self) -> RingAddress {
        self.ctx.local()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn need_side(&self, side: Direction) -> bool {
        let mut state = self.state.lock();
        let cached = match side {
            Direction::Left => state.need_left,
            Direction::Right => state.need_right,
        };
        if let Some(need) = cached {
            return need;
        }
        let structs = self.ctx.table.list(MainType::Structured);
        let local = self.local();
        let k = self.k();
        let close = structs
            .addresses()
            .filter(|a| {
                let rank = match side {
                    Direction::Left => structs.left_inclusive_count(&local, a),
                    Direction::Right => structs.right_inclusive_count(&local, a),
                };
                rank < k
            })
            .count();
        let need = close < k;
        match side {
            Direction::Left => state.need_left = Some(need),
            Direction::Right => state.need_right = Some(need),
        }
        need
    }

    fn need_connection(&self) -> bool {
        if self.ctx.table.count(MainType::Structured) < 2 * self.k() {
            return true;
        }
        self.need_side(Direction::Left) || self.need_side(Direction::Right)
    }

    fn is_connected(&self) -> bool {
        let local = self.local();
        let structs = self.ctx.table.list(MainType::Structured);
        let (Some(left), Some(right)) = (
            structs.left_neighbor_of(&local),
            structs.right_neighbor_of(&local),
        ) else {
            return false;
        };
        if left.address() == right.address() {
            // A two-node ring: fine as long as the peer knows only us.
            return right.status().neighbors.iter().all(|n| *n == local);
        }
        let better_left = left
            .status()
            .neighbors
            .iter()
            .any(|n| n.is_between_from_left(&local, left.address()));
        let better_right = right
            .status()
            .neighbors
            .iter()
            .any(|n| n.is_between_from_right(&local, right.address()));
        !(better_left || better_right)
    }

    fn directional(&self, direction: Direction) -> ConnectTarget {
        ConnectTarget::Route(Route::Directional {
            direction,
            ttl: u16::try_from(self.k()).unwrap_or(u16::MAX),
        })
    }

    fn self_probe(&self, via: RingAddress) -> ConnectTarget {
        ConnectTarget::Route(Route::Forward {
            via,
            target: self.local().successor(),
        })
    }

    fn activate(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let now = self.ctx.now();
        {
            let mut state = self.state.lock();
            if state.round_pending || !state.retry.try_begin(now) {
                return;
            }
        }

        let structs = self.ctx.table.list(MainType::Structured);
        let mut request = None;
        if structs.len() < 2 {
            let leaves = self.ctx.table.list(MainType::Leaf);
            if leaves.is_empty() {
                trace!(local = %self.local(), "No leaf to join through yet");
                return;
            }
            let leaf = {
                let mut state = self.state.lock();
                let mut pick = None;
                for _ in 0..2 * leaves.len() {
                    let candidate = leaves.at(state.rng.gen_range(0..leaves.len()) as isize);
                    pick = candidate;
                    match candidate {
                        Some(c) if leaves.len() > 1 && structs.contains(c.address()) => continue,
                        _ => break,
                    }
                }
                pick.map(|c| *c.address())
            };
            if let Some(leaf) = leaf {
                request = Some((self.self_probe(leaf), self.config.self_probe_responses));
            }
        }
        if request.is_none() && !structs.is_empty() {
            if self.need_side(Direction::Left) {
                request = Some((self.directional(Direction::Left), 1));
            } else if self.need_side(Direction::Right) {
                request = Some((self.directional(Direction::Right), 1));
            }
        }
        if let Some((target, wanted)) = request {
            self.connect(target, wanted, Slot::Round);
        }
    }

    fn connect(self: &Arc<Self>, target: ConnectTarget, wanted_responses: usize, slot: Slot) {
        if !self.is_active() {
            return;
        }
        {
            let mut state = self.state.lock();
            match slot {
                Slot::Round => state.round_pending = true,
                Slot::Keyed(key) => {
                    if !state.in_flight.insert(key) {
                        trace!(target = %key, "Near attempt already in flight");
                        return;
                    }
                }
            }
        }
        debug!(local = %self.local(), target = ?target, "Seeking near connection");
        let attempt = ConnectAttempt {
            target,
            kind: ConnectionType::Near,
            token: LinkToken::new(self.local()),
            wanted_responses,
        };
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.ctx.connector.start(
            attempt,
            Box::new(move |outcome| {
                if let Some(inner) = weak.upgrade() {
                    inner.finish(slot, outcome);
                }
            }),
        );
    }

    fn finish(self: &Arc<Self>, slot: Slot, outcome: ConnectOutcome) {
        {
            let mut state = self.state.lock();
            match slot {
                Slot::Round => state.round_pending = false,
                Slot::Keyed(key) => {
                    state.in_flight.remove(&key);
                }
            }
        }
        let mut forwarders = HashMap::new();
        let mut neighbors = Vec::new();
        for response in &outcome.responses {
            for n in &response.neighbors {
                forwarders.insert(*n, response.responder);
                neighbors.push(*n);
            }
        }
        if neighbors.is_empty() {
            return;
        }
        let structs = self.ctx.table.list(MainType::Structured);
        self.connect_to_nearer(&structs, &neighbors, |target| forwarders.get(target).copied());
    }

    /// Connect to the closest advertised nodes on each side that should be
    /// among our `k` neighbours but aren't connected yet.
    fn connect_to_nearer<F>(
        self: &Arc<Self>,
        structs: &ConnectionList,
        neighbors: &[RingAddress],
        forwarder: F,
    ) where
        F: Fn(&RingAddress) -> Option<RingAddress>,
    {
        let local = self.local();
        let k = self.k();
        let mut nearest_left: Option<(RingAddress, U160)> = None;
        let mut nearest_right: Option<(RingAddress, U160)> = None;
        for n in neighbors {
            if *n == local || !n.is_ring() || structs.contains(n) {
                continue;
            }
            let left_rank = structs.left_inclusive_count(&local, n);
            let right_rank = structs.right_inclusive_count(&local, n);
            if left_rank >= k && right_rank >= k {
                continue;
            }
            let ld = local.left_distance_to(n);
            if nearest_left.as_ref().map_or(true, |(_, d)| ld < *d) {
                nearest_left = Some((*n, ld));
            }
            let rd = local.right_distance_to(n);
            if nearest_right.as_ref().map_or(true, |(_, d)| rd < *d) {
                nearest_right = Some((*n, rd));
            }
        }

        let right = nearest_right.map(|(a, _)| a);
        let left = nearest_left.map(|(a, _)| a).filter(|a| Some(*a) != right);
        for target in right.into_iter().chain(left) {
            let Some(via) = forwarder(&target) else {
                continue;
            };
            trace!(local = %local, target = %target, via = %via, "Nearer neighbour advertised");
            self.connect(
                ConnectTarget::Route(Route::Forward { via, target }),
                1,
                Slot::Keyed(target),
            );
        }
    }

    fn on_connected(self: &Arc<Self>, event: &TableEvent) {
        self.touch();
        if !self.is_active() {
            return;
        }
        let connection = &event.connection;
        let structs = if event.main_type() == MainType::Structured {
            Arc::clone(&event.list)
        } else {
            if connection.main_type() == MainType::Leaf {
                // A new leaf may bridge to a part of the ring we don't know:
                // route a request at ourselves through it.
                let probe = self.self_probe(*connection.address());
                let key = self.local().successor();
                self.connect(probe, self.config.self_probe_responses, Slot::Keyed(key));
            }
            self.ctx.table.list(MainType::Structured)
        };
        let via = *connection.address();
        self.connect_to_nearer(&structs, &connection.status().neighbors, |_| Some(via));
    }

    fn on_disconnected(self: &Arc<Self>, event: &TableEvent) {
        self.touch();
        if !self.is_active() {
            return;
        }
        let connection = &event.connection;
        if connection.main_type() != MainType::Structured {
            self.activate();
            return;
        }
        let local = self.local();
        let gone = connection.address();
        let list = &event.list;
        if list.right_inclusive_count(&local, gone) < self.k() {
            self.connect(
                self.directional(Direction::Right),
                1,
                Slot::Keyed(RingAddress::directional(Direction::Right)),
            );
        }
        if list.left_inclusive_count(&local, gone) < self.k() {
            self.connect(
                self.directional(Direction::Left),
                1,
                Slot::Keyed(RingAddress::directional(Direction::Left)),
            );
        }
    }

    fn on_status_changed(self: &Arc<Self>, event: &TableEvent) {
        let connection = &event.connection;
        let structs = if event.main_type() == MainType::Structured {
            Arc::clone(&event.list)
        } else {
            self.ctx.table.list(MainType::Structured)
        };
        let via = *connection.address();
        self.connect_to_nearer(&structs, &connection.status().neighbors, |_| Some(via));
    }

    /// Topology changed: caches are stale and there is no reason to back off.
    fn touch(&self) {
        let now = self.ctx.now();
        let mut state = self.state.lock();
        state.last_connection_event = now;
        state.need_left = None;
        state.need_right = None;
        state.retry.reset();
    }

    fn trim(&self) {
        let local = self.local();
        let structs = self.ctx.table.list(MainType::Structured);
        let redundant = 2 * self.k();
        let to_trim = structs
            .iter()
            .filter(|c| c.kind() == ConnectionType::Near)
            .filter(|c| {
                structs.left_inclusive_count(&local, c.address()) >= redundant
                    && structs.right_inclusive_count(&local, c.address()) >= redundant
            })
            .max_by_key(|c| local.distance_to(c.address()).abs());
        if let Some(c) = to_trim {
            debug!(local = %local, peer = %c.address(), "Trimming redundant near connection");
            c.close("near: redundant neighbor");
        }
    }

    fn heartbeat(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let quiet = {
            let state = self.state.lock();
            self.ctx.now().saturating_duration_since(state.last_connection_event)
                >= self.config.trim_delay
        };
        if !quiet {
            return;
        }
        self.trim();
        if self.need_connection() {
            self.activate();
        }
    }
}

impl std::fmt::Debug for NearOverlord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("NearOverlord")
            .field("local", &self.inner.ctx.local())
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .field("round_pending", &state.round_pending)
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl ConnectionOverlord for NearOverlord {
    fn name(&self) -> &'static str {
        "near"
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Release);
    }

    fn need_connection(&self) -> bool {
        self.inner.need_connection()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn activate(&self) {
        self.inner.activate();
    }

    fn handle_event(&self, event: &TableEvent) {
        match event.kind {
            TableEventKind::Connected => self.inner.on_connected(event),
            TableEventKind::Disconnected => self.inner.on_disconnected(event),
            TableEventKind::StatusChanged => self.inner.on_status_changed(event),
        }
    }

    fn heartbeat(&self) {
        self.inner.heartbeat();
    }
}

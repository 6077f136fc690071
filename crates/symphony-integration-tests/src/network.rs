//! A whole overlay in one process.
//!
//! Every node gets its own [`ConnectionTable`]. Links are pairs of in-memory
//! edges that queue packets and close requests on a shared wire, and the
//! network plays the link layer: it resolves connect attempts, applies
//! closes and keeps peers' status advertisements current. Time only moves
//! when [`SimNetwork::step`] advances the shared [`ManualClock`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use symphony_broadcast::{BroadcastReceiver, BroadcastSender, Forwarders};
use symphony_ring::{Direction, RingAddress};
use symphony_table::{
    Connection, ConnectionTable, ConnectionType, Edge, EdgeError, LinkToken, MainType, TableEvent,
};
use symphony_overlord::{
    Clock, ConnectAttempt, ConnectOutcome, ConnectTarget, Connector,
    CtmResponse, FinishFn, ManualClock, OverlordConfig, OverlordContext, OverlordSet, Route,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, trace};

/// Neighbours a node advertises in its status.
pub const STATUS_SIZE: usize = 4;

const EVENT_CAPACITY: usize = 4096;

#[derive(Default)]
struct Wire {
    packets: VecDeque<(RingAddress, Bytes)>,
    closes: Vec<(RingAddress, RingAddress, MainType)>,
}

/// One direction of an in-memory link.
struct SimEdge {
    owner: RingAddress,
    peer: RingAddress,
    main: MainType,
    closed: AtomicBool,
    wire: Arc<Mutex<Wire>>,
}

impl fmt::Debug for SimEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEdge")
            .field("owner", &self.owner)
            .field("peer", &self.peer)
            .field("main", &self.main)
            .finish()
    }
}

impl Edge for SimEdge {
    fn send(&self, payload: Bytes) -> Result<(), EdgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EdgeError::Closed);
        }
        self.wire.lock().packets.push_back((self.peer, payload));
        Ok(())
    }

    fn close(&self, reason: &str) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!(owner = %self.owner, peer = %self.peer, reason, "Edge closing");
            self.wire.lock().closes.push((self.owner, self.peer, self.main));
        }
    }
}

struct PendingAttempt {
    local: RingAddress,
    attempt: ConnectAttempt,
    finish: FinishFn,
}

/// Queues a node's attempts for the network to resolve on its next step.
struct SimConnector {
    local: RingAddress,
    queue: Arc<Mutex<VecDeque<PendingAttempt>>>,
}

impl fmt::Debug for SimConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimConnector")
            .field("local", &self.local)
            .finish()
    }
}

impl Connector for SimConnector {
    fn start(&self, attempt: ConnectAttempt, finish: FinishFn) {
        self.queue.lock().push_back(PendingAttempt {
            local: self.local,
            attempt,
            finish,
        });
    }
}

struct SimNode {
    table: Arc<ConnectionTable>,
    events: Mutex<broadcast::Receiver<TableEvent>>,
    overlords: Option<OverlordSet>,
}

/// Per-node delivery counts of one broadcast.
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    pub deliveries: BTreeMap<RingAddress, usize>,
    pub max_hops: u32,
}

impl BroadcastReport {
    pub fn received(&self, address: &RingAddress) -> usize {
        self.deliveries.get(address).copied().unwrap_or(0)
    }

    pub fn duplicates(&self) -> usize {
        self.deliveries.values().map(|n| n.saturating_sub(1)).sum()
    }
}

/// The simulated overlay.
pub struct SimNetwork {
    clock: Arc<ManualClock>,
    nodes: BTreeMap<RingAddress, SimNode>,
    attempts: Arc<Mutex<VecDeque<PendingAttempt>>>,
    wire: Arc<Mutex<Wire>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new()),
            nodes: BTreeMap::new(),
            attempts: Arc::new(Mutex::new(VecDeque::new())),
            wire: Arc::new(Mutex::new(Wire::default())),
        }
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Add a node with an empty table and no overlords.
    pub fn add_node(&mut self, address: RingAddress) -> Arc<ConnectionTable> {
        let table = Arc::new(ConnectionTable::with_event_capacity(address, EVENT_CAPACITY));
        let events = Mutex::new(table.subscribe());
        self.nodes.insert(
            address,
            SimNode {
                table: Arc::clone(&table),
                events,
                overlords: None,
            },
        );
        table
    }

    /// Add a node running the full overlord set and start it.
    pub fn join(
        &mut self,
        address: RingAddress,
        config: &OverlordConfig,
    ) -> symphony_overlord::Result<OverlordSet> {
        let table = self.add_node(address);
        let connector = Arc::new(SimConnector {
            local: address,
            queue: Arc::clone(&self.attempts),
        });
        let ctx = OverlordContext::with_clock(
            table,
            connector as Arc<dyn Connector>,
            Arc::clone(&self.clock) as Arc<dyn Clock>,
        );
        let set = OverlordSet::new(ctx, config)?;
        if let Some(node) = self.nodes.get_mut(&address) {
            node.overlords = Some(set.clone());
        }
        set.start();
        Ok(set)
    }

    /// Drop a node and every link to it, as if it crashed.
    pub fn remove_node(&mut self, address: &RingAddress) {
        let Some(gone) = self.nodes.remove(address) else {
            return;
        };
        if let Some(set) = &gone.overlords {
            set.stop();
        }
        for node in self.nodes.values() {
            for main in [MainType::Leaf, MainType::Structured] {
                let _ = node.table.remove(main, address);
            }
        }
        debug!(node = %address, "Node removed");
    }

    pub fn addresses(&self) -> Vec<RingAddress> {
        self.nodes.keys().copied().collect()
    }

    pub fn table(&self, address: &RingAddress) -> Option<Arc<ConnectionTable>> {
        self.nodes.get(address).map(|n| Arc::clone(&n.table))
    }

    pub fn overlords(&self, address: &RingAddress) -> Option<&OverlordSet> {
        self.nodes.get(address).and_then(|n| n.overlords.as_ref())
    }

    /// Link two nodes in both tables. False if either is unknown or the
    /// link already exists on either side.
    pub fn link(
        &self,
        a: RingAddress,
        b: RingAddress,
        kind: ConnectionType,
        token: Option<LinkToken>,
    ) -> bool {
        if a == b {
            return false;
        }
        let (Some(na), Some(nb)) = (self.nodes.get(&a), self.nodes.get(&b)) else {
            return false;
        };
        let main = kind.main_type();
        if na.table.contains(main, &b) || nb.table.contains(main, &a) {
            return false;
        }
        let token = token.unwrap_or_else(|| LinkToken::new(a));
        for (owner, node, peer, peer_node) in [(a, na, b, nb), (b, nb, a, na)] {
            let edge = Arc::new(SimEdge {
                owner,
                peer,
                main,
                closed: AtomicBool::new(false),
                wire: Arc::clone(&self.wire),
            });
            let connection = Connection::new(peer, kind, edge as Arc<dyn Edge>)
                .with_created_at(self.clock.now())
                .with_token(token)
                .with_status(peer_node.table.status_message(STATUS_SIZE));
            if node.table.add(connection).is_err() {
                return false;
            }
        }
        trace!(a = %a, b = %b, kind = %kind, "Linked");
        true
    }

    /// One round: refresh statuses, deliver events and heartbeats, resolve
    /// attempts, apply closes, then advance the clock by `tick`.
    pub fn step(&self, tick: Duration) {
        self.refresh_statuses();
        self.pump_events();
        for node in self.nodes.values() {
            if let Some(set) = &node.overlords {
                for overlord in set.overlords() {
                    overlord.heartbeat();
                }
            }
        }
        self.resolve_attempts();
        self.apply_closes();
        self.clock.advance(tick);
    }

    pub fn run(&self, rounds: usize, tick: Duration) {
        for _ in 0..rounds {
            self.step(tick);
        }
    }

    /// Flood `payload` from `source` to the whole ring.
    pub fn broadcast(
        &self,
        source: &RingAddress,
        forwarders: Forwarders,
        payload: &[u8],
    ) -> symphony_broadcast::Result<BroadcastReport> {
        let Some(table) = self.table(source) else {
            return Ok(BroadcastReport::default());
        };
        self.flood(BroadcastSender::with_forwarders(table, forwarders), payload)
    }

    /// Flood `payload` from `source` over the arc `[from, to]`.
    pub fn broadcast_arc(
        &self,
        source: &RingAddress,
        from: RingAddress,
        to: RingAddress,
        forwarders: Forwarders,
        payload: &[u8],
    ) -> symphony_broadcast::Result<BroadcastReport> {
        let Some(table) = self.table(source) else {
            return Ok(BroadcastReport::default());
        };
        self.flood(BroadcastSender::for_arc(table, from, to, forwarders)?, payload)
    }

    fn flood(
        &self,
        mut sender: BroadcastSender,
        payload: &[u8],
    ) -> symphony_broadcast::Result<BroadcastReport> {
        self.wire.lock().packets.clear();
        sender.send(payload)?;
        let mut report = BroadcastReport::default();
        loop {
            let next = self.wire.lock().packets.pop_front();
            let Some((to, packet)) = next else {
                break;
            };
            let Some(table) = self.table(&to) else {
                continue;
            };
            let mut receiver = BroadcastReceiver::parse(table, packet)?;
            *report.deliveries.entry(to).or_insert(0) += 1;
            report.max_hops = report.max_hops.max(receiver.hops());
            receiver.forward()?;
        }
        Ok(report)
    }

    fn refresh_statuses(&self) {
        for node in self.nodes.values() {
            for main in [MainType::Leaf, MainType::Structured] {
                for connection in node.table.list(main).iter() {
                    let Some(peer) = self.nodes.get(connection.address()) else {
                        continue;
                    };
                    let status = peer.table.status_message(STATUS_SIZE);
                    if *connection.status() != status {
                        let _ = node.table.update_status(main, connection.address(), status);
                    }
                }
            }
        }
    }

    fn pump_events(&self) {
        for node in self.nodes.values() {
            let mut events = node.events.lock();
            loop {
                match events.try_recv() {
                    Ok(event) => {
                        if let Some(set) = &node.overlords {
                            for overlord in set.overlords() {
                                overlord.handle_event(&event);
                            }
                        }
                    }
                    Err(TryRecvError::Lagged(_)) => {
                        if let Some(set) = &node.overlords {
                            for overlord in set.overlords() {
                                overlord.heartbeat();
                            }
                        }
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
    }

    fn resolve_attempts(&self) {
        loop {
            let next = self.attempts.lock().pop_front();
            let Some(PendingAttempt {
                local,
                attempt,
                finish,
            }) = next
            else {
                break;
            };
            let outcome = self.resolve(local, &attempt);
            finish(outcome);
        }
    }

    fn resolve(&self, local: RingAddress, attempt: &ConnectAttempt) -> ConnectOutcome {
        if !self.nodes.contains_key(&local) {
            return ConnectOutcome::default();
        }
        let (responders, answer) = match &attempt.target {
            ConnectTarget::Endpoints(endpoints) => {
                let first = endpoints
                    .iter()
                    .filter_map(|e| e.parse::<RingAddress>().ok())
                    .find(|a| *a != local && self.nodes.contains_key(a));
                (first.into_iter().collect::<Vec<_>>(), false)
            }
            ConnectTarget::Route(route) => {
                (self.route(local, route, attempt.wanted_responses), true)
            }
        };
        let mut outcome = ConnectOutcome::default();
        for responder in responders {
            self.link(local, responder, attempt.kind, Some(attempt.token));
            if answer {
                let neighbors = self
                    .table(&responder)
                    .map(|t| t.status_message(STATUS_SIZE).neighbors)
                    .unwrap_or_default();
                outcome.responses.push(CtmResponse {
                    responder,
                    neighbors,
                });
            }
        }
        outcome
    }

    /// Nodes that would answer a connect-to request travelling `route`.
    fn route(&self, local: RingAddress, route: &Route, wanted: usize) -> Vec<RingAddress> {
        match route {
            Route::Exact(target) => {
                let end = self.route_greedy(local, target, &local);
                if end == *target {
                    vec![end]
                } else {
                    Vec::new()
                }
            }
            Route::Greedy(target) => {
                let end = self.route_greedy(local, target, &local);
                if end == local {
                    Vec::new()
                } else {
                    vec![end]
                }
            }
            Route::Forward { via, target } => {
                if !self.nodes.contains_key(via) {
                    return Vec::new();
                }
                let end = self.route_greedy(*via, target, &local);
                let mut out = vec![end];
                if let Some(table) = self.table(&end) {
                    out.extend(
                        table
                            .nearest_to(target, wanted + 1)
                            .iter()
                            .map(|c| *c.address())
                            .filter(|a| *a != local && *a != end)
                            .take(wanted.saturating_sub(1)),
                    );
                }
                out
            }
            Route::Directional { direction, ttl } => {
                let mut current = local;
                for _ in 0..*ttl {
                    let Some(table) = self.table(&current) else {
                        break;
                    };
                    let list = table.list(MainType::Structured);
                    let next = match direction {
                        Direction::Left => list.left_neighbor_of(&current),
                        Direction::Right => list.right_neighbor_of(&current),
                    };
                    match next.map(|c| *c.address()) {
                        Some(n) if n != local && self.nodes.contains_key(&n) => current = n,
                        _ => break,
                    }
                }
                if current == local {
                    Vec::new()
                } else {
                    vec![current]
                }
            }
        }
    }

    /// Walk structured links greedily toward `target`, never through `avoid`.
    fn route_greedy(
        &self,
        start: RingAddress,
        target: &RingAddress,
        avoid: &RingAddress,
    ) -> RingAddress {
        let mut current = start;
        for _ in 0..=self.nodes.len() {
            let Some(table) = self.table(&current) else {
                break;
            };
            let list = table.list(MainType::Structured);
            match list.next_hop(&current, target).map(|c| *c.address()) {
                Some(next) if next != *avoid && self.nodes.contains_key(&next) => current = next,
                _ => break,
            }
        }
        current
    }

    fn apply_closes(&self) {
        let closes = std::mem::take(&mut self.wire.lock().closes);
        for (owner, peer, main) in closes {
            for (node, gone) in [(owner, peer), (peer, owner)] {
                if let Some(table) = self.table(&node) {
                    let _ = table.remove(main, &gone);
                }
            }
        }
    }

    /// Structured connections of `address` that are of `kind`.
    pub fn connections_of(&self, address: &RingAddress, kind: ConnectionType) -> Vec<RingAddress> {
        self.table(address)
            .map(|t| {
                t.connections_of(kind)
                    .iter()
                    .map(|c| *c.address())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether every node is linked to its true ring neighbours on both sides.
    pub fn ring_is_consistent(&self) -> bool {
        let addresses = self.addresses();
        if addresses.len() < 2 {
            return true;
        }
        addresses.iter().enumerate().all(|(i, a)| {
            let right = addresses[(i + addresses.len() - 1) % addresses.len()];
            let left = addresses[(i + 1) % addresses.len()];
            self.table(a).map_or(false, |t| {
                t.contains(MainType::Structured, &left) && t.contains(MainType::Structured, &right)
            })
        })
    }
}

impl fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimNetwork")
            .field("nodes", &self.nodes.len())
            .field("elapsed", &self.clock.elapsed())
            .finish()
    }
}

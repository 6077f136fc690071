//! Bootstrap (leaf) connections.
//!
//! Leaf links get a fresh node talking to the overlay before it has a ring
//! position. The target count decays to zero once structured links have been
//! quiet for a while, and surplus leaves are trimmed with a probability that
//! rises with the surplus, so the cap stays soft.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use symphony_table::{ConnectionType, LinkToken, MainType, TableEvent, TableEventKind};
use tracing::{debug, trace};

use crate::backoff::RetryTimer;
use crate::config::LeafConfig;
use crate::connector::{ConnectAttempt, ConnectTarget};
use crate::overlord::{overlord_rng, ConnectionOverlord, OverlordContext};

const RNG_SALT: u64 = 0x1eaf;

struct LeafState {
    retry: RetryTimer,
    last_non_leaf_event: Option<Instant>,
    last_trim: Option<Instant>,
    pending: bool,
    endpoints: Vec<String>,
    rng: StdRng,
}

struct Inner {
    ctx: OverlordContext,
    config: LeafConfig,
    active: AtomicBool,
    state: Mutex<LeafState>,
}

/// Keeps a handful of leaf links open while the node needs them.
#[derive(Clone)]
pub struct LeafOverlord {
    inner: Arc<Inner>,
}

impl LeafOverlord {
    pub fn new(ctx: OverlordContext, config: LeafConfig, seed: Option<u64>) -> Self {
        let state = LeafState {
            retry: RetryTimer::new(config.retry),
            last_non_leaf_event: None,
            last_trim: None,
            pending: false,
            endpoints: config.bootstrap.clone(),
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

    /// Replace the known remote endpoints.
    pub fn set_remote_endpoints(&self, endpoints: Vec<String>) {
        self.inner.state.lock().endpoints = endpoints;
    }

    pub fn add_remote_endpoint(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        let mut state = self.inner.state.lock();
        if !state.endpoints.contains(&endpoint) {
            state.endpoints.push(endpoint);
        }
    }

    /// Leaf links currently wanted.
    pub fn desired_connections(&self) -> usize {
        let last = self.inner.state.lock().last_non_leaf_event;
        self.inner.desired_at(last, self.inner.ctx.now())
    }

    pub fn has_pending_attempt(&self) -> bool {
        self.inner.state.lock().pending
    }
}

impl Inner {
    fn desired_at(&self, last_non_leaf_event: Option<Instant>, now: Instant) -> usize {
        let desired = self.config.desired_connections;
        let Some(last) = last_non_leaf_event else {
            return desired;
        };
        // Without ring links the leaves are the only way in.
        if self.ctx.table.count(MainType::Structured) == 0 {
            return desired;
        }
        let window = self.config.decay_window.as_secs_f64();
        if window <= 0.0 {
            return 0;
        }
        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        let y = desired as f64 * (1.0 - elapsed / window);
        if y > 0.0 {
            y.round() as usize
        } else {
            0
        }
    }

    fn needs_leaf(&self, last_non_leaf_event: Option<Instant>, now: Instant) -> bool {
        self.ctx.table.count(MainType::Leaf) < self.desired_at(last_non_leaf_event, now)
    }

    fn check_and_connect(self: &Arc<Self>, event: Option<&TableEvent>) {
        let now = self.ctx.now();
        let attempt = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let topology_changed = match event {
                Some(ev) if ev.kind != TableEventKind::StatusChanged => {
                    if ev.main_type() != MainType::Leaf {
                        state.last_non_leaf_event = Some(now);
                    }
                    true
                }
                _ => false,
            };

            if !state.pending
                && state.retry.is_ready(now)
                && self.active.load(Ordering::Acquire)
                && !state.endpoints.is_empty()
                && self.needs_leaf(state.last_non_leaf_event, now)
            {
                state.retry.try_begin(now);
                state.pending = true;
                let mut endpoints = state.endpoints.clone();
                endpoints.shuffle(&mut state.rng);
                endpoints.truncate(self.config.endpoints_per_attempt.max(1));
                Some(ConnectAttempt {
                    target: ConnectTarget::Endpoints(endpoints),
                    kind: ConnectionType::Leaf,
                    token: LinkToken::new(self.ctx.local()),
                    wanted_responses: 0,
                })
            } else {
                if topology_changed {
                    // Links are forming, so there is nothing to back off from.
                    state.retry.reset();
                }
                None
            }
        };

        self.trim(now);

        if let Some(attempt) = attempt {
            debug!(
                local = %self.ctx.local(),
                endpoints = match &attempt.target {
                    ConnectTarget::Endpoints(e) => e.len(),
                    ConnectTarget::Route(_) => 0,
                },
                "Seeking leaf connection"
            );
            let weak: Weak<Inner> = Arc::downgrade(self);
            self.ctx.connector.start(
                attempt,
                Box::new(move |_outcome| {
                    if let Some(inner) = weak.upgrade() {
                        inner.state.lock().pending = false;
                    }
                }),
            );
        }
    }

    fn trim(&self, now: Instant) {
        let last_non_leaf_event = {
            let mut state = self.state.lock();
            let due = state
                .last_trim
                .map_or(true, |t| now.saturating_duration_since(t) > self.config.trim_interval);
            if !due {
                return;
            }
            state.last_trim = Some(now);
            state.last_non_leaf_event
        };

        let leaves = self.ctx.table.list(MainType::Leaf);
        let desired = self.desired_at(last_non_leaf_event, now);
        let surplus = leaves.len().saturating_sub(desired);
        if surplus == 0 {
            return;
        }
        let probability = if surplus > 1 {
            1.0 - 1.0 / surplus as f64
        } else {
            0.25
        };
        let roll: f64 = self.state.lock().rng.gen();
        if roll >= probability {
            trace!(surplus, probability, "Keeping surplus leaves this round");
            return;
        }
        if let Some(oldest) = leaves.iter().min_by_key(|c| c.created_at()) {
            debug!(
                local = %self.ctx.local(),
                peer = %oldest.address(),
                leaves = leaves.len(),
                desired,
                "Trimming oldest leaf"
            );
            oldest.close("leaf: too many leaf connections");
        }
    }
}

impl std::fmt::Debug for LeafOverlord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LeafOverlord")
            .field("local", &self.inner.ctx.local())
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .field("pending", &state.pending)
            .field("endpoints", &state.endpoints.len())
            .finish()
    }
}

impl ConnectionOverlord for LeafOverlord {
    fn name(&self) -> &'static str {
        "leaf"
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Release);
    }

    fn need_connection(&self) -> bool {
        let last = self.inner.state.lock().last_non_leaf_event;
        self.inner.needs_leaf(last, self.inner.ctx.now())
    }

    fn is_connected(&self) -> bool {
        self.inner.ctx.table.count(MainType::Leaf) > 0
    }

    fn activate(&self) {
        self.inner.state.lock().retry.force_ready();
        self.inner.check_and_connect(None);
    }

    fn handle_event(&self, event: &TableEvent) {
        if event.kind != TableEventKind::StatusChanged {
            self.inner.check_and_connect(Some(event));
        }
    }

    fn heartbeat(&self) {
        self.inner.check_and_connect(None);
    }
}

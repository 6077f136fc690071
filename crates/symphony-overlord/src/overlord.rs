//! The connection overlord contract and the context every overlord runs in.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use symphony_ring::RingAddress;
use symphony_table::{ConnectionTable, TableEvent};

use crate::clock::{Clock, SystemClock};
use crate::connector::Connector;

/// A self-stabilising policy that owns one class of connections.
///
/// Every method re-derives what it needs from the live table, so calls may
/// arrive from any thread and in any order. Implementations serialise their
/// own state and never block on network I/O.
pub trait ConnectionOverlord: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn is_active(&self) -> bool;

    /// Enable or suppress new attempts. Attempts already started run on.
    fn set_active(&self, active: bool);

    /// Does this overlord currently want another connection?
    fn need_connection(&self) -> bool;

    /// Does the node have the connections this overlord is responsible for?
    fn is_connected(&self) -> bool;

    /// Seek connections now if allowed.
    fn activate(&self);

    /// React to a connection table change.
    fn handle_event(&self, event: &TableEvent);

    /// Periodic upkeep: trimming, audits and retries.
    fn heartbeat(&self);

    fn start(&self) {
        self.set_active(true);
        self.activate();
    }

    fn stop(&self) {
        self.set_active(false);
    }
}

/// Collaborators shared by the overlords of one node.
#[derive(Debug, Clone)]
pub struct OverlordContext {
    pub table: Arc<ConnectionTable>,
    pub connector: Arc<dyn Connector>,
    pub clock: Arc<dyn Clock>,
}

impl OverlordContext {
    pub fn new(table: Arc<ConnectionTable>, connector: Arc<dyn Connector>) -> Self {
        Self::with_clock(table, connector, Arc::new(SystemClock))
    }

    pub fn with_clock(
        table: Arc<ConnectionTable>,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            connector,
            clock,
        }
    }

    pub fn local(&self) -> RingAddress {
        *self.table.local_address()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }
}

/// Random source for one overlord: seeded runs stay reproducible while the
/// overlords of a node still draw different streams.
pub(crate) fn overlord_rng(seed: Option<u64>, salt: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ salt.rotate_left(32)),
        None => StdRng::from_entropy(),
    }
}

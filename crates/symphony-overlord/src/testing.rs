//! Test doubles shared by the overlord unit tests.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use symphony_ring::{RingAddress, U160};
use symphony_table::testing::RecordingEdge;
use symphony_table::{
    Connection, ConnectionTable, ConnectionType, Edge, LinkToken, MainType, StatusMessage,
    TableEvent,
};
use tokio::sync::broadcast;

use crate::clock::ManualClock;
use crate::connector::{ConnectAttempt, ConnectOutcome, Connector, FinishFn};
use crate::overlord::{ConnectionOverlord, OverlordContext};

/// Records attempts; finishes them when the test says so.
#[derive(Default)]
pub struct ScriptedConnector {
    started: Mutex<Vec<ConnectAttempt>>,
    pending: Mutex<Vec<(ConnectAttempt, FinishFn)>>,
    immediate: bool,
}

impl fmt::Debug for ScriptedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedConnector")
            .field("started", &self.started.lock().len())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish every attempt with no responses as soon as it starts.
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn started(&self) -> Vec<ConnectAttempt> {
        self.started.lock().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Finish the oldest pending attempt.
    pub fn finish_next(&self, outcome: ConnectOutcome) -> Option<ConnectAttempt> {
        let next = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        next.map(|(attempt, done)| {
            done(outcome);
            attempt
        })
    }

    /// Finish everything pending with no responses.
    pub fn finish_all(&self) {
        while self.finish_next(ConnectOutcome::default()).is_some() {}
    }
}

impl Connector for ScriptedConnector {
    fn start(&self, attempt: ConnectAttempt, on_finish: FinishFn) {
        self.started.lock().push(attempt.clone());
        if self.immediate {
            on_finish(ConnectOutcome::default());
        } else {
            self.pending.lock().push((attempt, on_finish));
        }
    }
}

pub fn addr(n: u64) -> RingAddress {
    RingAddress::from_u160(U160::from_u64(n))
}

/// Address `n` steps of `2^150` round the ring.
pub fn spread(n: u64) -> RingAddress {
    RingAddress::from_u160(U160::from_u64(n) << 150)
}

/// One node's table, connector and clock, with a synchronous event pump.
pub struct Harness {
    pub ctx: OverlordContext,
    pub table: Arc<ConnectionTable>,
    pub connector: Arc<ScriptedConnector>,
    pub clock: Arc<ManualClock>,
    events: Mutex<broadcast::Receiver<TableEvent>>,
    edges: Mutex<Vec<(MainType, RingAddress, Arc<RecordingEdge>)>>,
}

impl Harness {
    pub fn new(local: RingAddress) -> Self {
        Self::with_connector(local, ScriptedConnector::new())
    }

    pub fn with_connector(local: RingAddress, connector: ScriptedConnector) -> Self {
        let table = Arc::new(ConnectionTable::new(local));
        let connector = Arc::new(connector);
        let clock = Arc::new(ManualClock::new());
        let ctx = OverlordContext::with_clock(
            Arc::clone(&table),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&clock) as Arc<dyn crate::clock::Clock>,
        );
        let events = Mutex::new(table.subscribe());
        Self {
            ctx,
            table,
            connector,
            clock,
            events,
            edges: Mutex::new(Vec::new()),
        }
    }

    pub fn local(&self) -> RingAddress {
        *self.table.local_address()
    }

    /// Add a connection created now.
    pub fn connect(&self, address: RingAddress, kind: ConnectionType) -> Arc<RecordingEdge> {
        self.connect_with(address, kind, None, StatusMessage::default())
    }

    pub fn connect_with(
        &self,
        address: RingAddress,
        kind: ConnectionType,
        token: Option<LinkToken>,
        status: StatusMessage,
    ) -> Arc<RecordingEdge> {
        let edge = RecordingEdge::new();
        let shared: Arc<dyn Edge> = Arc::clone(&edge) as Arc<dyn Edge>;
        let mut connection = Connection::new(address, kind, shared)
            .with_created_at(self.ctx.now())
            .with_status(status);
        if let Some(token) = token {
            connection = connection.with_token(token);
        }
        self.table.add(connection).unwrap();
        self.edges
            .lock()
            .push((kind.main_type(), address, Arc::clone(&edge)));
        edge
    }

    pub fn disconnect(&self, main: MainType, address: &RingAddress) {
        self.table.remove(main, address).unwrap();
        self.edges
            .lock()
            .retain(|(m, a, _)| !(*m == main && a == address));
    }

    /// Remove every connection whose edge was closed, like the link layer would.
    pub fn reap_closed(&self) -> Vec<RingAddress> {
        let closed: Vec<_> = self
            .edges
            .lock()
            .iter()
            .filter(|(_, _, e)| e.is_closed())
            .map(|(m, a, _)| (*m, *a))
            .collect();
        for (main, address) in &closed {
            self.disconnect(*main, address);
        }
        closed.into_iter().map(|(_, a)| a).collect()
    }

    pub fn drain(&self) -> Vec<TableEvent> {
        let mut rx = self.events.lock();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Deliver every queued table event to `overlord`.
    pub fn pump(&self, overlord: &dyn ConnectionOverlord) {
        for event in self.drain() {
            overlord.handle_event(&event);
        }
    }
}

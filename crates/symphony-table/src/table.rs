//! The shared connection table.
//!
//! Owned and mutated by the link layer. Every mutation swaps in a fresh
//! [`ConnectionList`] snapshot for the affected partition and publishes a
//! [`TableEvent`] carrying that snapshot, so subscribers always reason about
//! the exact list the change produced.

use std::sync::Arc;

use parking_lot::RwLock;
use symphony_ring::RingAddress;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionType, MainType, StatusMessage};
use crate::error::Result;
use crate::list::ConnectionList;
use crate::size::estimate_network_size;

/// Default capacity of the change-event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What happened to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEventKind {
    Connected,
    Disconnected,
    /// The peer advertised a new neighbour list.
    StatusChanged,
}

/// A change notification.
#[derive(Debug, Clone)]
pub struct TableEvent {
    pub kind: TableEventKind,
    pub connection: Arc<Connection>,
    /// Snapshot of the connection's partition right after the change.
    pub list: Arc<ConnectionList>,
}

impl TableEvent {
    pub fn main_type(&self) -> MainType {
        self.list.main_type()
    }
}

struct TableState {
    leaf: Arc<ConnectionList>,
    structured: Arc<ConnectionList>,
}

impl TableState {
    fn list(&self, main: MainType) -> &Arc<ConnectionList> {
        match main {
            MainType::Leaf => &self.leaf,
            MainType::Structured => &self.structured,
        }
    }

    fn set(&mut self, main: MainType, list: ConnectionList) -> Arc<ConnectionList> {
        let list = Arc::new(list);
        match main {
            MainType::Leaf => self.leaf = Arc::clone(&list),
            MainType::Structured => self.structured = Arc::clone(&list),
        }
        list
    }
}

/// Connections of the local node, partitioned into leaf and structured.
pub struct ConnectionTable {
    local: RingAddress,
    state: RwLock<TableState>,
    events: broadcast::Sender<TableEvent>,
}

impl ConnectionTable {
    pub fn new(local: RingAddress) -> Self {
        Self::with_event_capacity(local, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(local: RingAddress, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            local,
            state: RwLock::new(TableState {
                leaf: Arc::new(ConnectionList::new(MainType::Leaf)),
                structured: Arc::new(ConnectionList::new(MainType::Structured)),
            }),
            events,
        }
    }

    pub fn local_address(&self) -> &RingAddress {
        &self.local
    }

    /// Receive every subsequent change, in mutation order.
    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.events.subscribe()
    }

    /// Register a newly established connection.
    pub fn add(&self, connection: Connection) -> Result<Arc<Connection>> {
        let connection = Arc::new(connection);
        let main = connection.main_type();
        let mut state = self.state.write();
        let list = state.list(main).insert(Arc::clone(&connection))?;
        let list = state.set(main, list);
        debug!(
            local = %self.local,
            peer = %connection.address(),
            kind = %connection.kind(),
            count = list.len(),
            "Connection added"
        );
        self.publish(TableEventKind::Connected, &connection, list);
        Ok(connection)
    }

    /// Drop a closed connection.
    pub fn remove(&self, main: MainType, address: &RingAddress) -> Result<Arc<Connection>> {
        let mut state = self.state.write();
        let (list, removed) = state.list(main).remove(address)?;
        let list = state.set(main, list);
        debug!(
            local = %self.local,
            peer = %address,
            kind = %removed.kind(),
            count = list.len(),
            "Connection removed"
        );
        self.publish(TableEventKind::Disconnected, &removed, list);
        Ok(removed)
    }

    /// Record a peer's new neighbour advertisement.
    pub fn update_status(
        &self,
        main: MainType,
        address: &RingAddress,
        status: StatusMessage,
    ) -> Result<Arc<Connection>> {
        let mut state = self.state.write();
        let current = state
            .list(main)
            .get(address)
            .cloned()
            .ok_or(crate::error::TableError::UnknownAddress(*address))?;
        let updated = Arc::new(current.as_ref().clone().with_status(status));
        let list = state.list(main).replace(Arc::clone(&updated))?;
        let list = state.set(main, list);
        trace!(local = %self.local, peer = %address, "Status updated");
        self.publish(TableEventKind::StatusChanged, &updated, list);
        Ok(updated)
    }

    /// Current snapshot of one partition.
    pub fn list(&self, main: MainType) -> Arc<ConnectionList> {
        Arc::clone(self.state.read().list(main))
    }

    pub fn connections_of(&self, kind: ConnectionType) -> Vec<Arc<Connection>> {
        self.list(kind.main_type())
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, main: MainType) -> usize {
        self.state.read().list(main).len()
    }

    pub fn count_of(&self, kind: ConnectionType) -> usize {
        self.list(kind.main_type())
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    pub fn get(&self, main: MainType, address: &RingAddress) -> Option<Arc<Connection>> {
        self.state.read().list(main).get(address).cloned()
    }

    pub fn contains(&self, main: MainType, address: &RingAddress) -> bool {
        self.state.read().list(main).contains(address)
    }

    /// Structured connections nearest to `dest`.
    pub fn nearest_to(&self, dest: &RingAddress, max: usize) -> Vec<Arc<Connection>> {
        self.list(MainType::Structured).nearest_n(dest, max)
    }

    /// Nearest structured connection clockwise of `address`.
    pub fn left_neighbor_of(&self, address: &RingAddress) -> Option<Arc<Connection>> {
        self.list(MainType::Structured).left_neighbor_of(address).cloned()
    }

    /// Nearest structured connection counter-clockwise of `address`.
    pub fn right_neighbor_of(&self, address: &RingAddress) -> Option<Arc<Connection>> {
        self.list(MainType::Structured).right_neighbor_of(address).cloned()
    }

    /// The neighbour advertisement this node hands to peers.
    pub fn status_message(&self, max: usize) -> StatusMessage {
        StatusMessage::new(
            self.nearest_to(&self.local, max)
                .iter()
                .map(|c| *c.address())
                .collect(),
        )
    }

    /// Overlay size estimate from the current structured snapshot.
    pub fn network_size(&self) -> usize {
        estimate_network_size(&self.local, &self.list(MainType::Structured))
    }

    fn publish(
        &self,
        kind: TableEventKind,
        connection: &Arc<Connection>,
        list: Arc<ConnectionList>,
    ) {
        let event = TableEvent {
            kind,
            connection: Arc::clone(connection),
            list,
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ConnectionTable")
            .field("local", &self.local)
            .field("leaf", &state.leaf.len())
            .field("structured", &state.structured.len())
            .finish()
    }
}

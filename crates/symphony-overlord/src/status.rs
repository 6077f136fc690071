//! Neighbour status refresh.
//!
//! When the structured partition changes, the peers on either side of the
//! change are asked for their current neighbour lists. The answers land in
//! the table as status updates, which the near overlord then acts on.

use std::fmt;
use std::sync::{Arc, Weak};

use symphony_ring::RingAddress;
use symphony_table::{
    Connection, ConnectionTable, EdgeError, MainType, StatusMessage, TableError, TableEvent,
    TableEventKind,
};
use tracing::{trace, warn};

pub type StatusFn = Box<dyn FnOnce(Result<StatusMessage, EdgeError>) + Send>;

/// Asks a connected peer for its neighbour list.
pub trait StatusRequester: Send + Sync + fmt::Debug {
    fn request_status(&self, connection: &Arc<Connection>, done: StatusFn);
}

/// Refreshes the status of the neighbours around every structured change.
#[derive(Debug)]
pub struct NeighborStatusMonitor {
    table: Weak<ConnectionTable>,
    requester: Arc<dyn StatusRequester>,
}

impl NeighborStatusMonitor {
    pub fn new(table: &Arc<ConnectionTable>, requester: Arc<dyn StatusRequester>) -> Self {
        Self {
            table: Arc::downgrade(table),
            requester,
        }
    }

    pub fn handle_event(&self, event: &TableEvent) {
        if event.main_type() != MainType::Structured || event.kind == TableEventKind::StatusChanged
        {
            return;
        }
        let changed = event.connection.address();
        let mut targets: Vec<Arc<Connection>> = Vec::with_capacity(2);
        for neighbor in [
            event.list.left_neighbor_of(changed),
            event.list.right_neighbor_of(changed),
        ]
        .into_iter()
        .flatten()
        {
            if !targets.iter().any(|t| t.address() == neighbor.address()) {
                targets.push(Arc::clone(neighbor));
            }
        }
        for target in targets {
            let peer = *target.address();
            let table = self.table.clone();
            self.requester.request_status(
                &target,
                Box::new(move |result| apply_status(&table, peer, result)),
            );
        }
    }
}

fn apply_status(
    table: &Weak<ConnectionTable>,
    peer: RingAddress,
    result: Result<StatusMessage, EdgeError>,
) {
    let Some(table) = table.upgrade() else {
        return;
    };
    match result {
        Ok(status) => match table.update_status(MainType::Structured, &peer, status) {
            Ok(_) => {}
            Err(TableError::UnknownAddress(_)) => {
                trace!(peer = %peer, "Status for a connection that is already gone");
            }
            Err(e) => warn!(peer = %peer, error = %e, "Status update rejected"),
        },
        Err(EdgeError::Closed) => trace!(peer = %peer, "Status request hit a closed edge"),
        Err(e @ EdgeError::Transient(_)) => {
            warn!(peer = %peer, error = %e, "Status request failed, will retry on next change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{addr, Harness};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use symphony_table::ConnectionType;

    #[derive(Debug, Default)]
    struct CannedRequester {
        answers: HashMap<RingAddress, Result<StatusMessage, EdgeError>>,
        asked: Mutex<Vec<RingAddress>>,
    }

    impl StatusRequester for CannedRequester {
        fn request_status(&self, connection: &Arc<Connection>, done: StatusFn) {
            let peer = *connection.address();
            self.asked.lock().push(peer);
            let answer = self
                .answers
                .get(&peer)
                .cloned()
                .unwrap_or(Err(EdgeError::Closed));
            done(answer);
        }
    }

    #[test]
    fn refreshes_both_sides_of_a_new_neighbour() {
        let h = Harness::new(addr(1000));
        h.connect(addr(900), ConnectionType::Near);
        h.connect(addr(1200), ConnectionType::Near);
        h.drain();

        let requester = Arc::new(CannedRequester {
            answers: [
                (addr(900), Ok(StatusMessage::new(vec![addr(800)]))),
                (addr(1200), Err(EdgeError::Transient("timeout".into()))),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        });
        let monitor = NeighborStatusMonitor::new(
            &h.table,
            Arc::clone(&requester) as Arc<dyn StatusRequester>,
        );

        h.connect(addr(1100), ConnectionType::Near);
        for event in h.drain() {
            monitor.handle_event(&event);
        }
        let mut asked = requester.asked.lock().clone();
        asked.sort();
        assert_eq!(asked, vec![addr(900), addr(1200)]);
        let status = h
            .table
            .get(MainType::Structured, &addr(900))
            .unwrap()
            .status()
            .clone();
        assert_eq!(status.neighbors, vec![addr(800)]);
    }

    #[test]
    fn ignores_leaves_and_status_changes() {
        let h = Harness::new(addr(1000));
        let requester = Arc::new(CannedRequester::default());
        let monitor = NeighborStatusMonitor::new(
            &h.table,
            Arc::clone(&requester) as Arc<dyn StatusRequester>,
        );
        h.connect(addr(900), ConnectionType::Leaf);
        for event in h.drain() {
            monitor.handle_event(&event);
        }
        h.connect(addr(800), ConnectionType::Near);
        h.connect(addr(700), ConnectionType::Near);
        h.drain();
        h.table
            .update_status(MainType::Structured, &addr(800), StatusMessage::default())
            .unwrap();
        for event in h.drain() {
            monitor.handle_event(&event);
        }
        assert!(requester.asked.lock().is_empty());
    }
}

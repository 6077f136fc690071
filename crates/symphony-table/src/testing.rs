//! Edge doubles for tests and simulations.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::connection::Edge;
use crate::error::EdgeError;

/// Accepts and discards everything.
#[derive(Debug, Default)]
pub struct NullEdge;

impl NullEdge {
    pub fn shared() -> Arc<dyn Edge> {
        Arc::new(NullEdge)
    }
}

impl Edge for NullEdge {
    fn send(&self, _payload: Bytes) -> Result<(), EdgeError> {
        Ok(())
    }

    fn close(&self, _reason: &str) {}
}

/// Remembers what was sent and whether the edge was closed.
#[derive(Debug, Default)]
pub struct RecordingEdge {
    sent: Mutex<Vec<Bytes>>,
    closed: Mutex<Option<String>>,
    fail_sends: bool,
}

impl RecordingEdge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An edge whose sends always fail as if it had been closed.
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail_sends: true,
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn close_reason(&self) -> Option<String> {
        self.closed.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().is_some()
    }
}

impl Edge for RecordingEdge {
    fn send(&self, payload: Bytes) -> Result<(), EdgeError> {
        if self.fail_sends || self.is_closed() {
            return Err(EdgeError::Closed);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&self, reason: &str) {
        let mut closed = self.closed.lock();
        if closed.is_none() {
            *closed = Some(reason.to_string());
        }
    }
}

//! Hand-off to the link layer.
//!
//! Overlords decide *that* a connection is wanted and describe how the
//! connect-to request should travel. The [`Connector`] does the network work
//! and reports back through a one-shot callback.

use std::fmt;

use symphony_ring::{Direction, RingAddress};
use symphony_table::{ConnectionType, LinkToken};

/// How a connect-to request travels through the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Deliver only to the node holding exactly this address.
    Exact(RingAddress),
    /// Deliver to whichever node is closest to this address.
    Greedy(RingAddress),
    /// Relay through a connected peer, which routes on greedily.
    Forward { via: RingAddress, target: RingAddress },
    /// Walk `ttl` hops in `direction`; the last node answers.
    Directional { direction: Direction, ttl: u16 },
}

/// What a connection attempt aims at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Link straight to one of these transport endpoints.
    Endpoints(Vec<String>),
    /// Send a connect-to request along a route.
    Route(Route),
}

impl ConnectTarget {
    /// Ring address the attempt is keyed on, for de-duplication.
    pub fn key(&self) -> Option<RingAddress> {
        match self {
            ConnectTarget::Endpoints(_) => None,
            ConnectTarget::Route(Route::Exact(a)) | ConnectTarget::Route(Route::Greedy(a)) => {
                Some(*a)
            }
            ConnectTarget::Route(Route::Forward { target, .. }) => Some(*target),
            ConnectTarget::Route(Route::Directional { direction, .. }) => {
                Some(RingAddress::directional(*direction))
            }
        }
    }
}

/// One request for the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    pub target: ConnectTarget,
    pub kind: ConnectionType,
    pub token: LinkToken,
    /// Connect-to responses to wait for before finishing.
    pub wanted_responses: usize,
}

/// A connect-to response: who answered and who they know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtmResponse {
    pub responder: RingAddress,
    pub neighbors: Vec<RingAddress>,
}

/// Result of a finished attempt, successful or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub responses: Vec<CtmResponse>,
}

/// Completion callback. Called exactly once, possibly before `start` returns.
pub type FinishFn = Box<dyn FnOnce(ConnectOutcome) + Send>;

/// The external connection-setup service.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Begin an attempt. Must not block on network I/O.
    fn start(&self, attempt: ConnectAttempt, on_finish: FinishFn);
}

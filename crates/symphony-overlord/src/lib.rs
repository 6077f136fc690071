//! Symphony Connection Overlords
//!
//! Self-stabilising policies that keep a node attached to the ring.
//!
//! # Overlords
//!
//! - [`LeafOverlord`] holds bootstrap links until the node has a ring place.
//! - [`NearOverlord`] finds and keeps the `k` immediate neighbours per side.
//! - [`ShortcutOverlord`] keeps `ceil(0.5 log2 n)` harmonic long-range links
//!   plus an optional bypass, auditing them against a [`TargetSelector`].
//!
//! # Driving
//!
//! Overlords never own connections. They read the shared
//! [`ConnectionTable`](symphony_table::ConnectionTable), ask a [`Connector`]
//! for new links and close surplus ones. An [`OverlordDriver`] feeds them
//! table events and a periodic heartbeat; [`OverlordSet`] wires up the three
//! of one node.
//!
//! All decisions re-derive state from the live table, so the system
//! converges from any starting point.

mod backoff;
mod clock;
mod config;
mod connector;
mod driver;
mod error;
mod leaf;
mod near;
mod optimality;
mod overlord;
mod sampling;
mod selector;
mod shortcut;
mod status;

#[cfg(test)]
mod testing;

pub use backoff::RetryTimer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LeafConfig, NearConfig, OverlordConfig, RetryConfig, ShortcutConfig};
pub use connector::{
    ConnectAttempt, ConnectOutcome, ConnectTarget, Connector, CtmResponse, FinishFn, Route,
};
pub use driver::{EventSink, OverlordDriver, OverlordSet};
pub use error::{OverlordError, Result};
pub use leaf::LeafOverlord;
pub use near::NearOverlord;
pub use optimality::{is_connection_optimal, max_rank_for, DoubtLedger};
pub use overlord::{ConnectionOverlord, OverlordContext};
pub use sampling::{harmonic_displacement, sample_shortcut_target};
pub use selector::{
    CandidateProbe, Candidates, DefaultTargetSelector, MeasureFn, ProbingTargetSelector,
    ScoreTable, SelectorCallback, TargetSelector, MAX_CONCURRENT_ROUNDS,
};
pub use shortcut::{ShortcutOverlord, ShortcutStats};
pub use status::{NeighborStatusMonitor, StatusFn, StatusRequester};

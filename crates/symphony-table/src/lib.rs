//! Symphony Connection Table
//!
//! The local node's live links, kept as immutable ring-ordered snapshots.
//!
//! # Ownership
//!
//! The link layer is the only writer: it calls [`ConnectionTable::add`],
//! [`ConnectionTable::remove`] and [`ConnectionTable::update_status`] as
//! handshakes finish, edges close and peers re-advertise their neighbours.
//! Topology maintainers only read snapshots and subscribe to
//! [`TableEvent`]s; to change the table they ask the link layer to connect
//! or call [`Connection::close`].

mod connection;
mod error;
mod list;
mod size;
mod table;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{
    Connection, ConnectionType, Edge, LinkToken, MainType, StatusMessage,
};
pub use error::{EdgeError, Result, TableError};
pub use list::ConnectionList;
pub use size::estimate_network_size;
pub use table::{ConnectionTable, TableEvent, TableEventKind, DEFAULT_EVENT_CAPACITY};

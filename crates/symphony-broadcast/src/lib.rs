//! Symphony Arc Broadcast
//!
//! Floods a payload to every node on a contiguous arc of the ring, exactly
//! once, with bounded fan-out per hop.
//!
//! The initiator builds a [`BroadcastSender`] for the whole ring or for an
//! arc. Each hop splits its arc among the structured connections inside it
//! and hands every forwarder the sub-arc up to the next forwarder. A node
//! that receives a packet parses it into a [`BroadcastReceiver`], consumes
//! the payload and calls [`BroadcastReceiver::forward`] to recurse.

mod error;
mod header;
mod receiver;
mod sender;

pub use error::{BroadcastError, Result};
pub use header::{BroadcastHeader, Forwarders, HEADER_LEN};
pub use receiver::BroadcastReceiver;
pub use sender::{BroadcastSender, Hop};

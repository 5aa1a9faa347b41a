//! Sans-I/O core of the gossamer transport protocol.
//!
//! This crate holds everything about the protocol that can be expressed
//! without a socket or a clock of its own:
//!
//! * [`packet`] - the wire codec: one datagram is one [`Packet`], a tagged
//!   sum type decoded once at the edge
//! * [`channel`] - the four delivery disciplines as a pair of flags
//! * [`ack`] - the reliability tables: sent-awaiting-ack and the bounded
//!   recent-received queue feeding piggybacked acks
//! * [`ordering`] - the per-peer admission filter
//! * [`state`] - the connection lifecycle state machine
//! * [`rtt`] - sliding-window round-trip averaging
//! * [`codec`] - fallible little-endian byte plumbing shared by all of the
//!   above, also the serialization seam for application server-info blobs
//!
//! Time-dependent operations take [`std::time::Instant`]s from the caller,
//! which keeps every table and filter directly testable. The I/O plane, the
//! endpoint tasks and the public client/server APIs live in the `gossamer`
//! crate.

pub mod ack;
pub mod channel;
pub mod codec;
pub mod ordering;
pub mod packet;
pub mod rtt;
pub mod seq;
pub mod state;

pub use ack::{AckQueue, SentQueue};
pub use channel::Channel;
pub use ordering::OrderingFilter;
pub use packet::{Packet, PacketBody, PacketType, ResultCode};
pub use seq::Seq;
pub use state::{ConnectionState, StateEvent};

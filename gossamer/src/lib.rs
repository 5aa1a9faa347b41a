//! A reliability and ordering layer for client/server games over UDP.
//!
//! gossamer gives you four delivery channels over a single socket pair -
//! unreliable/unordered, unreliable/ordered, reliable/unordered and
//! reliable/ordered - plus a connection lifecycle with optional
//! challenge-response authentication, keep-alive, graceful termination,
//! idle-timeout eviction and a stateless out-of-band server info query.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use gossamer::auth::NoAuth;
//! use gossamer::client::{Client, ClientConfig};
//! use gossamer::server::{Server, ServerConfig};
//! use gossamer_proto::channel::Channel;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::start(
//!     ServerConfig::new(1, Arc::new(NoAuth)),
//!     "0.0.0.0:27110",
//! )
//! .await?;
//!
//! let (code, client) = Client::connect(
//!     ClientConfig::new(1),
//!     "127.0.0.1:27110",
//!     |challenge| challenge,
//!     Duration::from_secs(5),
//! )
//! .await?;
//! let client = client.expect("accepted");
//! client.send(Bytes::from_static(b"hello"), Channel::RELIABLE_ORDERED)?;
//! # let _ = (server, code);
//! # Ok(())
//! # }
//! ```
//!
//! Reliability is acknowledgement-driven: every outgoing packet piggybacks
//! the sequence numbers of recently received reliable packets, and a
//! periodic scan retransmits whatever stays unacknowledged past the resend
//! budget. There are no dedicated ack packets. The protocol details live in
//! the sans-I/O [`gossamer_proto`] crate.

pub mod auth;
pub mod client;
pub mod info;
pub mod io;
pub mod server;

mod shared;

pub use gossamer_proto::channel::Channel;
pub use gossamer_proto::packet::ResultCode;
pub use shared::{ConnectionInfo, SendError, SessionConfig};

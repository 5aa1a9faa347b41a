//! Session plumbing shared between the client and server endpoints.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use gossamer_proto::ack::{AckQueue, SentPacket, SentQueue};
use gossamer_proto::channel::Channel;
use gossamer_proto::codec::{CodecError, Result as CodecResult};
use gossamer_proto::ordering::OrderingFilter;
use gossamer_proto::packet::{Packet, PacketBody};
use gossamer_proto::seq::Seq;
use gossamer_proto::state::ConnectionState;
use tokio::sync::mpsc;

/// Tuning knobs of a session, shared by both endpoint kinds.
///
/// The defaults are the recommended values; tests shrink the timers to keep
/// wall-clock time down.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of simultaneously tracked peers (server only).
    /// Datagrams from unknown endpoints beyond this are dropped.
    pub max_connections: u32,
    /// Silence from a peer after which it is considered lost.
    pub idle_timeout: Duration,
    /// Age after which an un-acked reliable packet is retransmitted.
    pub resend_budget: Duration,
    /// Cadence of the retransmission scan.
    pub retransmit_scan_interval: Duration,
    /// Send silence towards a peer after which a keep-alive is emitted.
    pub keepalive_interval: Duration,
    /// Cadence of the client's ping duty.
    pub ping_interval: Duration,
    /// Width of the ping moving-average window.
    pub ping_window: Duration,
    /// Capacity of the recent-received ack queue.
    pub received_ack_capacity: usize,
    /// Upper bound on any variable-length wire field.
    pub max_payload: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            idle_timeout: Duration::from_secs(10),
            resend_budget: Duration::from_millis(1000),
            retransmit_scan_interval: Duration::from_millis(50),
            keepalive_interval: Duration::from_millis(500),
            ping_interval: Duration::from_millis(300),
            ping_window: Duration::from_secs(1),
            received_ack_capacity: 32,
            max_payload: 64 * 1024,
        }
    }
}

/// Error submitting an application payload.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No connected client has the given id.
    #[error("no connected client with id {0}")]
    UnknownClient(u64),
    /// The endpoint is not connected.
    #[error("not connected")]
    NotConnected,
    /// The payload could not be encoded, usually because it is over the
    /// configured maximum.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cadence of the idle-timeout scan.
pub(crate) const IDLE_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of the keep-alive scan; fine enough that a keep-alive goes out
/// well within a fraction of the idle timeout after the interval elapses.
pub(crate) const KEEPALIVE_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// Receive buffer size: the largest UDP datagram we can be handed.
pub(crate) const RECV_BUF_LEN: usize = 65_536;

/// Handle to an endpoint's outbound datagram queue.
///
/// Posting never blocks; the queue is unbounded and drained by the send
/// loop. Peer operations take this handle explicitly rather than holding a
/// reference back to their endpoint.
pub(crate) type OutboundTx = mpsc::UnboundedSender<(SocketAddr, Bytes)>;

/// Receiving half of the outbound queue, owned by the send loop.
pub(crate) type OutboundRx = mpsc::UnboundedReceiver<(SocketAddr, Bytes)>;

/// Per-peer session record.
///
/// The server keeps one per remote endpoint; the client keeps exactly one for
/// the server. Everything stateful about a peer lives here: the lifecycle
/// state, the outgoing sequence counters, both reliability tables, the
/// ordering filter and the activity timestamps.
#[derive(Debug)]
pub(crate) struct Connection {
    pub addr: SocketAddr,
    /// Assigned exactly once, when authentication succeeds; 0 until then.
    pub client_id: u64,
    pub state: ConnectionState,
    /// Reliable and unreliable packets number themselves independently; the
    /// channel flag on the wire says which space a sequence belongs to. This
    /// keeps the reliable space gapless, which the reliable-ordered admission
    /// cursor on the receiving side depends on.
    next_reliable: Seq,
    next_unreliable: Seq,
    pub filter: OrderingFilter,
    pub sent: SentQueue,
    pub acks: AckQueue,
    pub last_recv_at: Instant,
    pub last_sent_at: Instant,
    /// Challenge sent to this peer, kept for validating the response.
    pub challenge: Option<Bytes>,
}

impl Connection {
    pub fn new(addr: SocketAddr, now: Instant, ack_capacity: usize) -> Self {
        Self {
            addr,
            client_id: 0,
            state: ConnectionState::Disconnected,
            next_reliable: Seq(1),
            next_unreliable: Seq(1),
            filter: OrderingFilter::new(),
            sent: SentQueue::new(),
            acks: AckQueue::new(ack_capacity),
            last_recv_at: now,
            last_sent_at: now,
            challenge: None,
        }
    }

    /// Builds the next outgoing packet, assigns its sequence number, attaches
    /// the pending acks, encodes it and posts it to the outbound queue.
    ///
    /// Reliable packets are also stored for retransmission. Returns the
    /// assigned sequence number.
    pub fn send(
        &mut self,
        channel: Channel,
        body: PacketBody,
        max_payload: usize,
        tx: &OutboundTx,
        now: Instant,
    ) -> CodecResult<Seq> {
        let seq = if channel.reliable {
            self.next_reliable.next()
        } else {
            self.next_unreliable.next()
        };
        let packet = Packet {
            seq,
            channel,
            acks: self.acks.next_acks(),
            body,
        };
        let wire = packet.encode(max_payload)?;
        if channel.reliable {
            self.sent.insert(packet, now);
        }
        self.last_sent_at = now;
        let _ = tx.send((self.addr, wire));
        Ok(seq)
    }

    /// Ingests the piggybacked acks of an inbound packet and records its
    /// receive time. Returns the retired sent-table entries.
    ///
    /// This runs before the ordering filter on purpose: a stale packet must
    /// still retire the acks it carries, otherwise retransmitted acks would
    /// be discarded along with the bodies they ride on.
    pub fn ingest(&mut self, packet: &Packet, now: Instant) -> Vec<SentPacket> {
        self.last_recv_at = now;
        self.sent.ingest_acks(&packet.acks)
    }

    /// Retransmits every stored reliable packet older than the resend budget.
    pub fn resend_due(
        &mut self,
        budget: Duration,
        max_payload: usize,
        tx: &OutboundTx,
        now: Instant,
    ) {
        for seq in self.sent.due_for_resend(now, budget) {
            let Some(packet) = self.sent.mark_resent(seq, now) else {
                continue;
            };
            if let Ok(wire) = packet.encode(max_payload) {
                self.last_sent_at = now;
                let _ = tx.send((self.addr, wire));
            }
        }
    }
}

/// Public snapshot of a peer's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote endpoint of the peer.
    pub addr: SocketAddr,
    /// Assigned client id; 0 while the handshake is in progress.
    pub client_id: u64,
    /// Lifecycle state.
    pub state: ConnectionState,
}

impl From<&Connection> for ConnectionInfo {
    fn from(conn: &Connection) -> Self {
        Self {
            addr: conn.addr,
            client_id: conn.client_id,
            state: conn.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use gossamer_proto::packet::ResultCode;

    use super::*;

    fn conn() -> (Connection, OutboundTx, OutboundRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = "127.0.0.1:9".parse().expect("valid addr");
        (Connection::new(addr, Instant::now(), 32), tx, rx)
    }

    #[test]
    fn sequences_start_at_one_and_increase_per_space() {
        let (mut conn, tx, _rx) = conn();
        let max = 64 * 1024;
        let now = Instant::now();
        let first = conn
            .send(Channel::RELIABLE_ORDERED, PacketBody::KeepAlive, max, &tx, now)
            .expect("encodes");
        let second = conn
            .send(Channel::RELIABLE_UNORDERED, PacketBody::KeepAlive, max, &tx, now)
            .expect("encodes");
        assert_eq!(Seq(1), first);
        assert_eq!(Seq(2), second);
        // the unreliable space numbers itself independently
        let unreliable = conn
            .send(Channel::UNRELIABLE_ORDERED, PacketBody::KeepAlive, max, &tx, now)
            .expect("encodes");
        assert_eq!(Seq(1), unreliable);
    }

    #[test]
    fn only_reliable_packets_are_retained() {
        let (mut conn, tx, _rx) = conn();
        let max = 64 * 1024;
        let now = Instant::now();
        conn.send(Channel::UNRELIABLE_UNORDERED, PacketBody::KeepAlive, max, &tx, now)
            .expect("encodes");
        assert!(conn.sent.is_empty());
        conn.send(Channel::RELIABLE_UNORDERED, PacketBody::KeepAlive, max, &tx, now)
            .expect("encodes");
        assert_eq!(1, conn.sent.len());
    }

    #[test]
    fn retransmission_reuses_the_original_sequence() {
        let (mut conn, tx, mut rx) = conn();
        let max = 64 * 1024;
        let start = Instant::now();
        conn.send(Channel::RELIABLE_ORDERED, PacketBody::KeepAlive, max, &tx, start)
            .expect("encodes");
        let (_, first_wire) = rx.try_recv().expect("packet queued");
        let first = Packet::decode(first_wire, max).expect("decodes");

        let later = start + Duration::from_secs(2);
        conn.resend_due(Duration::from_millis(100), max, &tx, later);
        let (_, resent_wire) = rx.try_recv().expect("retransmission queued");
        let resent = Packet::decode(resent_wire, max).expect("decodes");
        assert_eq!(first.seq, resent.seq);

        // and the next fresh packet still takes the next counter value
        let next = conn
            .send(Channel::RELIABLE_ORDERED, PacketBody::KeepAlive, max, &tx, later)
            .expect("encodes");
        assert_eq!(first.seq.successor(), next);
    }

    #[test]
    fn outgoing_packets_carry_pending_acks() {
        let (mut conn, tx, mut rx) = conn();
        let max = 64 * 1024;
        let now = Instant::now();
        conn.acks.push(Seq(3));
        conn.acks.push(Seq(7));
        conn.send(
            Channel::UNRELIABLE_UNORDERED,
            PacketBody::ConnectionResponse {
                code: ResultCode::Success,
                client_id: 1,
            },
            max,
            &tx,
            now,
        )
        .expect("encodes");
        let (_, wire) = rx.try_recv().expect("packet queued");
        let decoded = Packet::decode(wire, max).expect("decodes");
        assert_eq!(vec![Seq(7), Seq(3)], decoded.acks);
    }
}

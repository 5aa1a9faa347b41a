//! The server endpoint.
//!
//! A [`Server`] owns the peer registry and a set of cooperative loops over
//! one UDP socket: receive (decode + dispatch), send (drain the outbound
//! queue), retransmit scan, idle scan and per-peer keep-alive. Peers are
//! created on the first datagram from an unknown endpoint and destroyed on
//! termination, idle timeout or a failed handshake.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ahash::AHashMap;
use bytes::Bytes;
use gossamer_proto::channel::Channel;
use gossamer_proto::packet::{Packet, PacketBody, ResultCode};
use gossamer_proto::seq::Seq;
use gossamer_proto::state::{ConnectionState, StateEvent};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::auth::Authenticator;
use crate::info::ServerInfoProvider;
use crate::io::DatagramSocket;
use crate::shared::{
    lock, Connection, ConnectionInfo, OutboundRx, OutboundTx, SendError, SessionConfig,
    IDLE_SCAN_INTERVAL, KEEPALIVE_SCAN_INTERVAL, RECV_BUF_LEN,
};

/// Configuration of a [`Server`].
pub struct ServerConfig {
    /// Primary application protocol id.
    pub protocol_id: u32,
    /// Additional protocol ids this server accepts connections from.
    pub secondary_protocol_ids: Vec<u32>,
    /// Session tuning knobs.
    pub session: SessionConfig,
    /// Challenge producer/validator driving the handshake.
    pub authenticator: Arc<dyn Authenticator>,
    /// Answers out-of-band info queries. Queries are ignored when absent.
    pub info_provider: Option<Arc<dyn ServerInfoProvider>>,
}

impl ServerConfig {
    /// Creates a config with default session tuning, no secondaries and no
    /// info provider.
    #[must_use]
    pub fn new(protocol_id: u32, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            protocol_id,
            secondary_protocol_ids: Vec::new(),
            session: SessionConfig::default(),
            authenticator,
            info_provider: None,
        }
    }
}

/// Event raised by a [`Server`], consumed via [`Server::event`].
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A client completed the handshake and was assigned an id.
    ClientConnected {
        /// The assigned client id.
        client_id: u64,
    },
    /// A handshake failed, either on the protocol gate or on authentication.
    /// The peer has already been removed.
    AuthenticationFailed {
        /// Endpoint of the failed peer.
        addr: SocketAddr,
        /// Which gate it failed.
        code: ResultCode,
    },
    /// An authenticated client sent application data.
    Recv {
        /// Sender's client id.
        client_id: u64,
        /// The payload, byte-identical to what the peer sent.
        payload: Bytes,
        /// Channel the payload arrived on.
        channel: Channel,
    },
    /// A client's session ended, gracefully or by timeout.
    ConnectionTerminated {
        /// The client id; 0 if the handshake never completed.
        client_id: u64,
        /// Human-readable cause.
        reason: String,
    },
}

/// Error starting a [`Server`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the socket failed.
    #[error("failed to bind socket")]
    Bind(#[source] io::Error),
}

/// Handle to a running server.
///
/// Dropping the handle does not stop the loops; call [`Server::stop`] for a
/// clean shutdown.
pub struct Server {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    socket: DatagramSocket,
    protocol_id: u32,
    secondary_protocol_ids: Vec<u32>,
    config: SessionConfig,
    authenticator: Arc<dyn Authenticator>,
    info_provider: Option<Arc<dyn ServerInfoProvider>>,
    peers: Mutex<AHashMap<SocketAddr, Connection>>,
    next_client_id: AtomicU64,
    outbound: OutboundTx,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: watch::Sender<bool>,
}

/// Async follow-up decided while holding the registry lock. The authenticator
/// is awaited outside the lock, then the result is applied under a fresh
/// lock.
enum Dispatch {
    Done,
    GetChallenge {
        addr: SocketAddr,
    },
    VerifyResponse {
        addr: SocketAddr,
        challenge: Bytes,
        response: Bytes,
    },
}

impl Server {
    /// Binds the given endpoint and launches the server loops. Returns once
    /// the socket is bound and every loop is running.
    ///
    /// # Errors
    ///
    /// Errors if the socket cannot be bound.
    pub async fn start(config: ServerConfig, bind_addr: impl ToSocketAddrs) -> Result<Self, ServerError> {
        let socket = DatagramSocket::bind(bind_addr)
            .await
            .map_err(ServerError::Bind)?;
        Ok(Self::start_on(config, socket))
    }

    /// Launches the server loops on an already bound socket.
    #[must_use]
    pub fn start_on(config: ServerConfig, socket: DatagramSocket) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            socket,
            protocol_id: config.protocol_id,
            secondary_protocol_ids: config.secondary_protocol_ids,
            config: config.session,
            authenticator: config.authenticator,
            info_provider: config.info_provider,
            peers: Mutex::new(AHashMap::new()),
            next_client_id: AtomicU64::new(0),
            outbound,
            events: event_tx,
            shutdown,
        });
        debug!("Server up");
        let tasks = vec![
            tokio::spawn(recv_loop(Arc::clone(&shared)).instrument(debug_span!("recv"))),
            tokio::spawn(
                send_loop(Arc::clone(&shared), outbound_rx).instrument(debug_span!("send")),
            ),
            tokio::spawn(resend_loop(Arc::clone(&shared)).instrument(debug_span!("resend"))),
            tokio::spawn(idle_loop(Arc::clone(&shared)).instrument(debug_span!("idle"))),
            tokio::spawn(keepalive_loop(Arc::clone(&shared)).instrument(debug_span!("keepalive"))),
        ];
        Self {
            shared,
            events: event_rx,
            tasks,
        }
    }

    /// Signals every loop to stop, waits for them to quiesce and closes the
    /// socket.
    pub async fn stop(mut self) {
        let _ = self.shared.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        debug!("Server stopped");
    }

    /// The local address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Errors if the socket cannot report its address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// Waits for the next server event. Returns `None` once the server has
    /// shut down and all pending events are drained.
    pub async fn event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Returns the next pending event without waiting.
    pub fn try_event(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// Sends an application payload to a connected client on the given
    /// channel.
    ///
    /// # Errors
    ///
    /// Errors if no connected client has this id, or if the payload exceeds
    /// the configured maximum.
    pub fn send_to(&self, client_id: u64, payload: Bytes, channel: Channel) -> Result<(), SendError> {
        let now = Instant::now();
        let mut peers = lock(&self.shared.peers);
        let conn = peers
            .values_mut()
            .find(|conn| conn.state.is_connected() && conn.client_id == client_id)
            .ok_or(SendError::UnknownClient(client_id))?;
        conn.send(
            channel,
            PacketBody::ApplicationData(payload),
            self.shared.config.max_payload,
            &self.shared.outbound,
            now,
        )?;
        Ok(())
    }

    /// Terminates a client's session: sends a reliable termination, removes
    /// the peer and emits [`ServerEvent::ConnectionTerminated`].
    ///
    /// # Errors
    ///
    /// Errors if no connected client has this id.
    pub fn disconnect_client(
        &self,
        client_id: u64,
        reason: impl Into<String>,
    ) -> Result<(), SendError> {
        let reason = reason.into();
        let now = Instant::now();
        let mut peers = lock(&self.shared.peers);
        let addr = peers
            .values()
            .find(|conn| conn.state.is_connected() && conn.client_id == client_id)
            .map(|conn| conn.addr)
            .ok_or(SendError::UnknownClient(client_id))?;
        if let Some(conn) = peers.get_mut(&addr) {
            if let Some(next) = conn.state.apply(StateEvent::TerminationSent) {
                conn.state = next;
            }
            let _ = conn.send(
                Channel::RELIABLE_UNORDERED,
                PacketBody::Termination {
                    reason: reason.clone(),
                },
                self.shared.config.max_payload,
                &self.shared.outbound,
                now,
            );
        }
        peers.remove(&addr);
        debug!("Disconnected client {client_id}: {reason}");
        let _ = self.shared.events.send(ServerEvent::ConnectionTerminated { client_id, reason });
        Ok(())
    }

    /// Snapshot of the connected client with this id, if any.
    #[must_use]
    pub fn connection(&self, client_id: u64) -> Option<ConnectionInfo> {
        let peers = lock(&self.shared.peers);
        peers
            .values()
            .find(|conn| conn.state.is_connected() && conn.client_id == client_id)
            .map(ConnectionInfo::from)
    }

    /// Snapshots of every tracked peer, handshaking peers included.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let peers = lock(&self.shared.peers);
        peers.values().map(ConnectionInfo::from).collect()
    }

    /// Total bytes this server has offered to the wire.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.shared.socket.bytes_sent()
    }

    /// Total bytes this server has received off the wire.
    #[must_use]
    pub fn bytes_recv(&self) -> u64 {
        self.shared.socket.bytes_recv()
    }

    /// The primary protocol id.
    #[must_use]
    pub fn protocol_id(&self) -> u32 {
        self.shared.protocol_id
    }

    /// The additionally accepted protocol ids.
    #[must_use]
    pub fn secondary_protocol_ids(&self) -> &[u32] {
        &self.shared.secondary_protocol_ids
    }
}

async fn recv_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            result = shared.socket.recv_from(&mut buf) => match result {
                Ok((len, addr)) => shared.handle_datagram(&buf[..len], addr).await,
                Err(err) => {
                    warn!("Receive failed, shutting down: {err}");
                    let _ = shared.shutdown.send(true);
                    return;
                }
            },
        }
    }
}

async fn send_loop(shared: Arc<Shared>, mut outbound: OutboundRx) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            item = outbound.recv() => match item {
                Some((addr, wire)) => {
                    if let Err(err) = shared.socket.send_to(&wire, addr).await {
                        debug!("Send to {addr} failed: {err}");
                    }
                }
                None => return,
            },
        }
    }
    // flush what was queued before the signal, then quiesce
    while let Ok((addr, wire)) = outbound.try_recv() {
        let _ = shared.socket.send_to(&wire, addr).await;
    }
}

async fn resend_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut tick = tokio::time::interval(shared.config.retransmit_scan_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let now = Instant::now();
                let mut peers = lock(&shared.peers);
                for conn in peers.values_mut() {
                    conn.resend_due(
                        shared.config.resend_budget,
                        shared.config.max_payload,
                        &shared.outbound,
                        now,
                    );
                }
            }
        }
    }
}

async fn idle_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut tick = tokio::time::interval(IDLE_SCAN_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let now = Instant::now();
                let mut timed_out = Vec::new();
                {
                    let mut peers = lock(&shared.peers);
                    peers.retain(|addr, conn| {
                        if now.duration_since(conn.last_recv_at) <= shared.config.idle_timeout {
                            return true;
                        }
                        if let Some(next) = conn.state.apply(StateEvent::TimedOut) {
                            conn.state = next;
                        }
                        timed_out.push((*addr, conn.client_id));
                        false
                    });
                }
                for (addr, client_id) in timed_out {
                    debug!("Peer {addr} timed out");
                    let _ = shared.events.send(ServerEvent::ConnectionTerminated {
                        client_id,
                        reason: "timed out".to_owned(),
                    });
                }
            }
        }
    }
}

async fn keepalive_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut tick = tokio::time::interval(KEEPALIVE_SCAN_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let now = Instant::now();
                let mut peers = lock(&shared.peers);
                for conn in peers.values_mut() {
                    if now.duration_since(conn.last_sent_at) >= shared.config.keepalive_interval {
                        let _ = conn.send(
                            Channel::UNRELIABLE_UNORDERED,
                            PacketBody::KeepAlive,
                            shared.config.max_payload,
                            &shared.outbound,
                            now,
                        );
                    }
                }
            }
        }
    }
}

impl Shared {
    async fn handle_datagram(&self, datagram: &[u8], addr: SocketAddr) {
        let packet = match Packet::decode(Bytes::copy_from_slice(datagram), self.config.max_payload)
        {
            Ok(packet) => packet,
            Err(err) => {
                trace!("Dropped undecodable datagram from {addr}: {err}");
                return;
            }
        };
        if matches!(packet.body, PacketBody::InfoRequest) {
            // stateless by contract: never touches the registry
            self.answer_info_request(addr).await;
            return;
        }
        let step = self.dispatch_sync(packet, addr, Instant::now());
        match step {
            Dispatch::Done => {}
            Dispatch::GetChallenge { addr } => {
                let challenge = self.authenticator.challenge_for(0).await;
                self.send_challenge(addr, challenge, Instant::now());
            }
            Dispatch::VerifyResponse {
                addr,
                challenge,
                response,
            } => {
                let authenticated = self.authenticator.authenticate(0, challenge, response).await;
                self.finish_handshake(addr, authenticated, Instant::now());
            }
        }
    }

    /// Lock-side half of dispatch: registry upkeep, ack ingestion, ordering
    /// filter, then the state machine for everything that needs no await.
    fn dispatch_sync(&self, packet: Packet, addr: SocketAddr, now: Instant) -> Dispatch {
        let mut peers = lock(&self.peers);
        if !peers.contains_key(&addr) {
            if peers.len() >= self.config.max_connections as usize {
                trace!("Registry full, dropping datagram from {addr}");
                return Dispatch::Done;
            }
            debug!("New peer {addr}");
            peers.insert(
                addr,
                Connection::new(addr, now, self.config.received_ack_capacity),
            );
        }
        let Some(conn) = peers.get_mut(&addr) else {
            return Dispatch::Done;
        };

        conn.ingest(&packet, now);
        if !conn.filter.admit(packet.channel, packet.seq) {
            return Dispatch::Done;
        }
        if packet.channel.reliable {
            conn.acks.push(packet.seq);
        }

        match packet.body {
            PacketBody::ConnectionRequest { protocol_id, .. } => {
                let Some(next) = conn.state.apply(StateEvent::ConnectionRequestReceived) else {
                    return Dispatch::Done;
                };
                if protocol_id != self.protocol_id
                    && !self.secondary_protocol_ids.contains(&protocol_id)
                {
                    debug!("Peer {addr} speaks unsupported protocol {protocol_id}");
                    let _ = conn.send(
                        Channel::UNRELIABLE_UNORDERED,
                        PacketBody::ConnectionResponse {
                            code: ResultCode::UnsupportedProtocolVersion,
                            client_id: 0,
                        },
                        self.config.max_payload,
                        &self.outbound,
                        now,
                    );
                    peers.remove(&addr);
                    let _ = self.events.send(ServerEvent::AuthenticationFailed {
                        addr,
                        code: ResultCode::UnsupportedProtocolVersion,
                    });
                    return Dispatch::Done;
                }
                conn.state = next;
                Dispatch::GetChallenge { addr }
            }
            PacketBody::ChallengeResponse(response) => {
                if conn.state != ConnectionState::WaitingForChallengeResponse {
                    return Dispatch::Done;
                }
                let Some(challenge) = conn.challenge.clone() else {
                    return Dispatch::Done;
                };
                Dispatch::VerifyResponse {
                    addr,
                    challenge,
                    response,
                }
            }
            PacketBody::ApplicationData(payload) => {
                if conn.state.is_connected() {
                    let _ = self.events.send(ServerEvent::Recv {
                        client_id: conn.client_id,
                        payload,
                        channel: packet.channel,
                    });
                }
                Dispatch::Done
            }
            PacketBody::Termination { reason } => {
                let Some(next) = conn.state.apply(StateEvent::TerminationReceived) else {
                    return Dispatch::Done;
                };
                conn.state = next;
                let client_id = conn.client_id;
                let _ = conn.send(
                    Channel::UNRELIABLE_UNORDERED,
                    PacketBody::TerminationAck,
                    self.config.max_payload,
                    &self.outbound,
                    now,
                );
                peers.remove(&addr);
                debug!("Peer {addr} terminated: {reason}");
                let _ = self
                    .events
                    .send(ServerEvent::ConnectionTerminated { client_id, reason });
                Dispatch::Done
            }
            // keep-alives only refresh the activity timestamps, done above;
            // stray termination acks and client-bound types are ignored
            PacketBody::KeepAlive
            | PacketBody::TerminationAck
            | PacketBody::Challenge(_)
            | PacketBody::ConnectionResponse { .. }
            | PacketBody::InfoRequest
            | PacketBody::InfoResponse(_) => Dispatch::Done,
        }
    }

    fn send_challenge(&self, addr: SocketAddr, challenge: Bytes, now: Instant) {
        let mut peers = lock(&self.peers);
        let Some(conn) = peers.get_mut(&addr) else {
            return;
        };
        if conn.state != ConnectionState::Requested {
            return;
        }
        let Some(next) = conn.state.apply(StateEvent::ChallengeSent) else {
            return;
        };
        conn.challenge = Some(challenge.clone());
        if conn
            .send(
                Channel::RELIABLE_UNORDERED,
                PacketBody::Challenge(challenge),
                self.config.max_payload,
                &self.outbound,
                now,
            )
            .is_ok()
        {
            conn.state = next;
        }
    }

    fn finish_handshake(&self, addr: SocketAddr, authenticated: bool, now: Instant) {
        let mut peers = lock(&self.peers);
        let Some(conn) = peers.get_mut(&addr) else {
            return;
        };
        if conn.state != ConnectionState::WaitingForChallengeResponse {
            return;
        }
        if authenticated {
            let Some(next) = conn.state.apply(StateEvent::ChallengeResponseReceived) else {
                return;
            };
            conn.state = next;
            conn.client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            let client_id = conn.client_id;
            let _ = conn.send(
                Channel::RELIABLE_UNORDERED,
                PacketBody::ConnectionResponse {
                    code: ResultCode::Success,
                    client_id,
                },
                self.config.max_payload,
                &self.outbound,
                now,
            );
            if let Some(after_response) = conn.state.apply(StateEvent::ConnectionResponseSent) {
                conn.state = after_response;
            }
            debug!("Peer {addr} connected as client {client_id}");
            let _ = self.events.send(ServerEvent::ClientConnected { client_id });
        } else {
            let _ = conn.send(
                Channel::UNRELIABLE_UNORDERED,
                PacketBody::ConnectionResponse {
                    code: ResultCode::InvalidAuthentication,
                    client_id: 0,
                },
                self.config.max_payload,
                &self.outbound,
                now,
            );
            peers.remove(&addr);
            debug!("Peer {addr} failed authentication");
            let _ = self.events.send(ServerEvent::AuthenticationFailed {
                addr,
                code: ResultCode::InvalidAuthentication,
            });
        }
    }

    async fn answer_info_request(&self, addr: SocketAddr) {
        let Some(provider) = &self.info_provider else {
            return;
        };
        let blob = provider.server_info().await;
        let packet = Packet {
            seq: Seq::ZERO,
            channel: Channel::UNRELIABLE_UNORDERED,
            acks: Vec::new(),
            body: PacketBody::InfoResponse(blob),
        };
        match packet.encode(self.config.max_payload) {
            Ok(wire) => {
                let _ = self.outbound.send((addr, wire));
            }
            Err(err) => debug!("Failed to encode info response: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::NoAuth;
    use crate::shared::OutboundRx;

    use super::*;

    async fn test_shared() -> (
        Arc<Shared>,
        OutboundRx,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let socket = DatagramSocket::bind("127.0.0.1:0").await.expect("binds");
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            socket,
            protocol_id: 5,
            secondary_protocol_ids: vec![3],
            config: SessionConfig {
                max_connections: 2,
                ..SessionConfig::default()
            },
            authenticator: Arc::new(NoAuth),
            info_provider: None,
            peers: Mutex::new(AHashMap::new()),
            next_client_id: AtomicU64::new(0),
            outbound,
            events: event_tx,
            shutdown,
        });
        (shared, outbound_rx, event_rx)
    }

    fn connection_request(seq: u64, protocol_id: u32) -> Packet {
        Packet {
            seq: Seq(seq),
            channel: Channel::RELIABLE_UNORDERED,
            acks: Vec::new(),
            body: PacketBody::ConnectionRequest {
                protocol_id,
                protocol_version: 0,
            },
        }
    }

    #[tokio::test]
    async fn connection_request_creates_a_requested_peer() {
        let (shared, _outbound, _events) = test_shared().await;
        let addr: SocketAddr = "127.0.0.1:4000".parse().expect("valid addr");

        let step = shared.dispatch_sync(connection_request(1, 5), addr, Instant::now());
        assert!(matches!(step, Dispatch::GetChallenge { addr: a } if a == addr));
        let peers = lock(&shared.peers);
        assert_eq!(ConnectionState::Requested, peers[&addr].state);
    }

    #[tokio::test]
    async fn unsupported_protocol_is_refused_and_removed() {
        let (shared, mut outbound, mut events) = test_shared().await;
        let addr: SocketAddr = "127.0.0.1:4001".parse().expect("valid addr");

        let step = shared.dispatch_sync(connection_request(1, 9), addr, Instant::now());
        assert!(matches!(step, Dispatch::Done));
        assert!(lock(&shared.peers).is_empty());

        let (_, wire) = outbound.try_recv().expect("response queued");
        let response = Packet::decode(wire, shared.config.max_payload).expect("decodes");
        assert!(matches!(
            response.body,
            PacketBody::ConnectionResponse {
                code: ResultCode::UnsupportedProtocolVersion,
                ..
            }
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(ServerEvent::AuthenticationFailed {
                code: ResultCode::UnsupportedProtocolVersion,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn secondary_protocol_passes_the_gate() {
        let (shared, _outbound, _events) = test_shared().await;
        let addr: SocketAddr = "127.0.0.1:4002".parse().expect("valid addr");

        let step = shared.dispatch_sync(connection_request(1, 3), addr, Instant::now());
        assert!(matches!(step, Dispatch::GetChallenge { .. }));
    }

    #[tokio::test]
    async fn successful_handshake_connects_and_assigns_the_first_id() {
        let (shared, mut outbound, mut events) = test_shared().await;
        let addr: SocketAddr = "127.0.0.1:4003".parse().expect("valid addr");
        let now = Instant::now();

        let step = shared.dispatch_sync(connection_request(1, 5), addr, now);
        assert!(matches!(step, Dispatch::GetChallenge { .. }));
        shared.send_challenge(addr, Bytes::new(), now);

        let answer = Packet {
            seq: Seq(2),
            channel: Channel::RELIABLE_UNORDERED,
            acks: Vec::new(),
            body: PacketBody::ChallengeResponse(Bytes::new()),
        };
        let Dispatch::VerifyResponse {
            addr: verify_addr,
            challenge,
            response,
        } = shared.dispatch_sync(answer, addr, now)
        else {
            panic!("expected a verify step");
        };
        assert_eq!(addr, verify_addr);
        let authenticated = shared.authenticator.authenticate(0, challenge, response).await;
        shared.finish_handshake(addr, authenticated, now);

        {
            let peers = lock(&shared.peers);
            let conn = &peers[&addr];
            assert_eq!(ConnectionState::AuthenticatedConnected, conn.state);
            assert_eq!(0, conn.client_id);
        }
        assert!(matches!(
            events.try_recv(),
            Ok(ServerEvent::ClientConnected { client_id: 0 })
        ));
        // the challenge and the connection response both went out
        assert!(outbound.try_recv().is_ok());
        assert!(outbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn registry_cap_drops_unknown_endpoints() {
        let (shared, _outbound, _events) = test_shared().await;
        let now = Instant::now();
        for port in [4010u16, 4011, 4012] {
            let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid addr");
            shared.dispatch_sync(connection_request(1, 5), addr, now);
        }
        // max_connections is 2; the third endpoint was never registered
        assert_eq!(2, lock(&shared.peers).len());
    }

    #[tokio::test]
    async fn termination_acks_and_removes_the_peer() {
        let (shared, mut outbound, mut events) = test_shared().await;
        let addr: SocketAddr = "127.0.0.1:4020".parse().expect("valid addr");
        let now = Instant::now();

        shared.dispatch_sync(connection_request(1, 5), addr, now);
        {
            let mut peers = lock(&shared.peers);
            let conn = peers.get_mut(&addr).expect("peer exists");
            conn.state = ConnectionState::AuthenticatedConnected;
            conn.client_id = 7;
        }

        let termination = Packet {
            seq: Seq(2),
            channel: Channel::RELIABLE_UNORDERED,
            acks: Vec::new(),
            body: PacketBody::Termination {
                reason: "bye".to_owned(),
            },
        };
        let step = shared.dispatch_sync(termination, addr, now);
        assert!(matches!(step, Dispatch::Done));
        assert!(lock(&shared.peers).is_empty());

        let (_, wire) = outbound.try_recv().expect("ack queued");
        let response = Packet::decode(wire, shared.config.max_payload).expect("decodes");
        assert!(matches!(response.body, PacketBody::TerminationAck));
        assert!(matches!(
            events.try_recv(),
            Ok(ServerEvent::ConnectionTerminated { client_id: 7, .. })
        ));
    }

    #[tokio::test]
    async fn data_from_unauthenticated_peers_is_ignored() {
        let (shared, _outbound, mut events) = test_shared().await;
        let addr: SocketAddr = "127.0.0.1:4030".parse().expect("valid addr");
        let now = Instant::now();

        shared.dispatch_sync(connection_request(1, 5), addr, now);
        let data = Packet {
            seq: Seq(2),
            channel: Channel::RELIABLE_UNORDERED,
            acks: Vec::new(),
            body: PacketBody::ApplicationData(Bytes::from_static(b"early")),
        };
        shared.dispatch_sync(data, addr, now);
        assert!(events.try_recv().is_err());
    }
}

//! The client endpoint.
//!
//! A [`Client`] mirrors the server around a single peer record: the same
//! reliability tables and ordering filter, plus three duties of its own - the
//! keep-alive that stops the server's idle scan from evicting a quiet
//! application, the ping that feeds the round-trip estimator, and the connect
//! handshake itself, which runs inline on the socket before any loop is
//! spawned.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use gossamer_proto::channel::Channel;
use gossamer_proto::codec::Decode;
use gossamer_proto::packet::{Packet, PacketBody, ResultCode, PROTOCOL_VERSION};
use gossamer_proto::rtt::RttWindow;
use gossamer_proto::seq::Seq;
use gossamer_proto::state::{ConnectionState, StateEvent};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::io::DatagramSocket;
use crate::shared::{
    lock, Connection, OutboundRx, OutboundTx, SendError, SessionConfig, IDLE_SCAN_INTERVAL,
    KEEPALIVE_SCAN_INTERVAL, RECV_BUF_LEN,
};

/// Configuration of a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application protocol id sent in the connection request.
    pub protocol_id: u32,
    /// Session tuning knobs.
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Creates a config with default session tuning.
    #[must_use]
    pub fn new(protocol_id: u32) -> Self {
        Self {
            protocol_id,
            session: SessionConfig::default(),
        }
    }
}

/// Event raised by a [`Client`], consumed via [`Client::event`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server sent application data.
    Recv {
        /// The payload, byte-identical to what the server sent.
        payload: Bytes,
        /// Channel the payload arrived on.
        channel: Channel,
    },
    /// The server terminated the session.
    DisconnectedByServer {
        /// Human-readable cause sent by the server.
        reason: String,
    },
    /// The server went silent past the idle timeout.
    Disconnected,
}

/// Error establishing or using a [`Client`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Binding the local socket failed.
    #[error("failed to bind socket")]
    Bind(#[source] io::Error),
    /// Resolving or reaching the server endpoint failed.
    #[error("failed to reach server")]
    Connect(#[source] io::Error),
    /// A packet could not be encoded or a blob could not be decoded.
    #[error(transparent)]
    Codec(#[from] gossamer_proto::codec::CodecError),
}

/// Handle to a connected client.
pub struct Client {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    tasks: Vec<JoinHandle<()>>,
    client_id: u64,
}

struct Shared {
    socket: DatagramSocket,
    config: SessionConfig,
    conn: Mutex<Connection>,
    rtt: Mutex<RttWindow>,
    outbound: OutboundTx,
    events: mpsc::UnboundedSender<ClientEvent>,
    shutdown: watch::Sender<bool>,
}

impl Client {
    /// Connects to a server: binds an ephemeral socket, sends the connection
    /// request on the reliable channel and drives the handshake until the
    /// server responds or `timeout` elapses.
    ///
    /// `respond` is called once with the server's challenge and must produce
    /// the answer (for an unauthenticated server, echoing the challenge back
    /// suffices).
    ///
    /// Returns the result code and, on [`ResultCode::Success`], the running
    /// client. A silent server yields [`ResultCode::NoResponse`].
    ///
    /// # Errors
    ///
    /// Errors if the local socket cannot be bound or the server address
    /// cannot be resolved.
    pub async fn connect(
        config: ClientConfig,
        server_addr: impl ToSocketAddrs,
        respond: impl FnMut(Bytes) -> Bytes,
        timeout: Duration,
    ) -> Result<(ResultCode, Option<Self>), ClientError> {
        let socket = DatagramSocket::bind("0.0.0.0:0")
            .await
            .map_err(ClientError::Bind)?;
        Self::connect_on(config, socket, server_addr, respond, timeout).await
    }

    /// [`connect`](Self::connect) on an already bound socket.
    ///
    /// # Errors
    ///
    /// Errors if the server address cannot be resolved.
    pub async fn connect_on(
        config: ClientConfig,
        socket: DatagramSocket,
        server_addr: impl ToSocketAddrs,
        mut respond: impl FnMut(Bytes) -> Bytes,
        timeout: Duration,
    ) -> Result<(ResultCode, Option<Self>), ClientError> {
        socket
            .connect(server_addr)
            .await
            .map_err(ClientError::Connect)?;
        let server = socket.peer_addr().map_err(ClientError::Connect)?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            socket,
            config: config.session.clone(),
            conn: Mutex::new(Connection::new(
                server,
                Instant::now(),
                config.session.received_ack_capacity,
            )),
            rtt: Mutex::new(RttWindow::new(config.session.ping_window)),
            outbound,
            events: event_tx,
            shutdown,
        });
        // the send loop runs from the start so the handshake's own packets
        // and retransmissions flow; every other loop waits for the handshake
        let mut tasks = vec![tokio::spawn(
            send_loop(Arc::clone(&shared), outbound_rx).instrument(debug_span!("send")),
        )];

        {
            let mut conn = lock(&shared.conn);
            conn.state = ConnectionState::Requested;
            let _ = conn.send(
                Channel::RELIABLE_UNORDERED,
                PacketBody::ConnectionRequest {
                    protocol_id: config.protocol_id,
                    protocol_version: PROTOCOL_VERSION,
                },
                shared.config.max_payload,
                &shared.outbound,
                Instant::now(),
            );
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut tick = tokio::time::interval(shared.config.retransmit_scan_interval);
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let mut answered = false;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    debug!("Server {server} never responded");
                    shutdown_tasks(&shared, &mut tasks).await;
                    return Ok((ResultCode::NoResponse, None));
                }
                _ = tick.tick() => {
                    let now = Instant::now();
                    let mut conn = lock(&shared.conn);
                    conn.resend_due(
                        shared.config.resend_budget,
                        shared.config.max_payload,
                        &shared.outbound,
                        now,
                    );
                }
                result = shared.socket.recv(&mut buf) => {
                    let len = match result {
                        Ok(len) => len,
                        Err(err) => {
                            // a refused port surfaces here on connected UDP
                            // sockets; keep trying until the deadline
                            trace!("Receive failed during handshake: {err}");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };
                    let Ok(packet) =
                        Packet::decode(Bytes::copy_from_slice(&buf[..len]), shared.config.max_payload)
                    else {
                        continue;
                    };
                    let now = Instant::now();
                    let mut conn = lock(&shared.conn);
                    conn.ingest(&packet, now);
                    if !conn.filter.admit(packet.channel, packet.seq) {
                        continue;
                    }
                    if packet.channel.reliable {
                        conn.acks.push(packet.seq);
                    }
                    match packet.body {
                        PacketBody::Challenge(challenge) => {
                            if answered {
                                continue;
                            }
                            answered = true;
                            conn.state = ConnectionState::WaitingForChallengeResponse;
                            let response = respond(challenge);
                            let _ = conn.send(
                                Channel::RELIABLE_UNORDERED,
                                PacketBody::ChallengeResponse(response),
                                shared.config.max_payload,
                                &shared.outbound,
                                now,
                            );
                        }
                        PacketBody::ConnectionResponse {
                            code: ResultCode::Success,
                            client_id,
                        } => {
                            conn.state = ConnectionState::AuthenticatedConnected;
                            conn.client_id = client_id;
                            drop(conn);
                            debug!("Connected to {server} as client {client_id}");
                            tasks.extend(spawn_loops(&shared));
                            return Ok((
                                ResultCode::Success,
                                Some(Self {
                                    shared,
                                    events: event_rx,
                                    tasks,
                                    client_id,
                                }),
                            ));
                        }
                        PacketBody::ConnectionResponse { code, .. } => {
                            drop(conn);
                            debug!("Server {server} refused connection: {code:?}");
                            shutdown_tasks(&shared, &mut tasks).await;
                            return Ok((code, None));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// The id the server assigned to this client.
    #[must_use]
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// The local address this client is bound to.
    ///
    /// # Errors
    ///
    /// Errors if the socket cannot report its address.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// Sends an application payload to the server on the given channel.
    ///
    /// # Errors
    ///
    /// Errors if the session is no longer connected, or if the payload
    /// exceeds the configured maximum.
    pub fn send(&self, payload: Bytes, channel: Channel) -> Result<(), SendError> {
        let now = Instant::now();
        let mut conn = lock(&self.shared.conn);
        if !conn.state.is_connected() {
            return Err(SendError::NotConnected);
        }
        conn.send(
            channel,
            PacketBody::ApplicationData(payload),
            self.shared.config.max_payload,
            &self.shared.outbound,
            now,
        )?;
        Ok(())
    }

    /// Waits for the next client event. Returns `None` once the client has
    /// shut down and all pending events are drained.
    pub async fn event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Returns the next pending event without waiting.
    pub fn try_event(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }

    /// The rolling average of ping round-trips over the configured window.
    ///
    /// Zero until the first ping has been acknowledged.
    #[must_use]
    pub fn ping(&self) -> Duration {
        lock(&self.shared.rtt).average(Instant::now())
    }

    /// Total bytes this client has offered to the wire.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.shared.socket.bytes_sent()
    }

    /// Total bytes this client has received off the wire.
    #[must_use]
    pub fn bytes_recv(&self) -> u64 {
        self.shared.socket.bytes_recv()
    }

    /// Gracefully terminates the session and stops every loop.
    pub async fn disconnect(mut self) {
        {
            let now = Instant::now();
            let mut conn = lock(&self.shared.conn);
            if let Some(next) = conn.state.apply(StateEvent::TerminationSent) {
                conn.state = next;
            }
            let _ = conn.send(
                Channel::RELIABLE_UNORDERED,
                PacketBody::Termination {
                    reason: "disconnected".to_owned(),
                },
                self.shared.config.max_payload,
                &self.shared.outbound,
                now,
            );
        }
        shutdown_tasks(&self.shared, &mut self.tasks).await;
        debug!("Client stopped");
    }

    /// One-shot server info query on an ephemeral socket; never establishes
    /// a connection.
    ///
    /// The blob is decoded with the caller-supplied [`Decode`] impl. Returns
    /// `None` when the server does not answer within `timeout`.
    ///
    /// # Errors
    ///
    /// Errors if the socket cannot be bound, the address cannot be resolved,
    /// or the returned blob does not decode as `T`.
    pub async fn request_server_info<T: Decode>(
        server_addr: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Option<T>, ClientError> {
        let socket = DatagramSocket::bind("0.0.0.0:0")
            .await
            .map_err(ClientError::Bind)?;
        socket
            .connect(server_addr)
            .await
            .map_err(ClientError::Connect)?;
        let request = Packet {
            seq: Seq(1),
            channel: Channel::UNRELIABLE_UNORDERED,
            acks: Vec::new(),
            body: PacketBody::InfoRequest,
        };
        let max_payload = SessionConfig::default().max_payload;
        let wire = request.encode(max_payload)?;
        socket.send(&wire).await.map_err(ClientError::Connect)?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return Ok(None),
                result = socket.recv(&mut buf) => {
                    let len = match result {
                        Ok(len) => len,
                        Err(_) => {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };
                    let Ok(packet) =
                        Packet::decode(Bytes::copy_from_slice(&buf[..len]), max_payload)
                    else {
                        continue;
                    };
                    if let PacketBody::InfoResponse(blob) = packet.body {
                        let mut blob = blob;
                        return Ok(Some(T::decode(&mut blob)?));
                    }
                }
            }
        }
    }
}

async fn shutdown_tasks(shared: &Shared, tasks: &mut Vec<JoinHandle<()>>) {
    let _ = shared.shutdown.send(true);
    for task in tasks.drain(..) {
        let _ = task.await;
    }
}

fn spawn_loops(shared: &Arc<Shared>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(recv_loop(Arc::clone(shared)).instrument(debug_span!("recv"))),
        tokio::spawn(resend_loop(Arc::clone(shared)).instrument(debug_span!("resend"))),
        tokio::spawn(keepalive_loop(Arc::clone(shared)).instrument(debug_span!("keepalive"))),
        tokio::spawn(ping_loop(Arc::clone(shared)).instrument(debug_span!("ping"))),
        tokio::spawn(idle_loop(Arc::clone(shared)).instrument(debug_span!("idle"))),
    ]
}

async fn send_loop(shared: Arc<Shared>, mut outbound: OutboundRx) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            item = outbound.recv() => match item {
                Some((_, wire)) => {
                    if let Err(err) = shared.socket.send(&wire).await {
                        debug!("Send failed: {err}");
                    }
                }
                None => return,
            },
        }
    }
    while let Ok((_, wire)) = outbound.try_recv() {
        let _ = shared.socket.send(&wire).await;
    }
}

async fn recv_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            result = shared.socket.recv(&mut buf) => match result {
                Ok(len) => shared.dispatch(&buf[..len]),
                Err(err) => {
                    warn!("Receive failed, shutting down: {err}");
                    let _ = shared.events.send(ClientEvent::Disconnected);
                    let _ = shared.shutdown.send(true);
                    return;
                }
            },
        }
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
                let mut conn = lock(&shared.conn);
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

async fn keepalive_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut tick = tokio::time::interval(KEEPALIVE_SCAN_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let now = Instant::now();
                let mut conn = lock(&shared.conn);
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

/// Pings are reliable keep-alives: the peer's piggybacked ack retiring one is
/// the pong, and the elapsed time is the round-trip sample.
async fn ping_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut tick = tokio::time::interval(shared.config.ping_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let now = Instant::now();
                let mut conn = lock(&shared.conn);
                let _ = conn.send(
                    Channel::RELIABLE_UNORDERED,
                    PacketBody::KeepAlive,
                    shared.config.max_payload,
                    &shared.outbound,
                    now,
                );
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
                let timed_out = {
                    let mut conn = lock(&shared.conn);
                    if now.duration_since(conn.last_recv_at) > shared.config.idle_timeout {
                        if let Some(next) = conn.state.apply(StateEvent::TimedOut) {
                            conn.state = next;
                        }
                        true
                    } else {
                        false
                    }
                };
                if timed_out {
                    debug!("Server went silent, disconnecting");
                    let _ = shared.events.send(ClientEvent::Disconnected);
                    let _ = shared.shutdown.send(true);
                    return;
                }
            }
        }
    }
}

impl Shared {
    fn dispatch(&self, datagram: &[u8]) {
        let Ok(packet) = Packet::decode(Bytes::copy_from_slice(datagram), self.config.max_payload)
        else {
            trace!("Dropped undecodable datagram");
            return;
        };
        let now = Instant::now();
        let mut conn = lock(&self.conn);
        let retired = conn.ingest(&packet, now);
        {
            let mut rtt = lock(&self.rtt);
            for sent in &retired {
                if !sent.resent && matches!(sent.packet.body, PacketBody::KeepAlive) {
                    rtt.push(now, now.duration_since(sent.sent_at));
                }
            }
        }
        if !conn.filter.admit(packet.channel, packet.seq) {
            return;
        }
        if packet.channel.reliable {
            conn.acks.push(packet.seq);
        }
        match packet.body {
            PacketBody::ApplicationData(payload) => {
                if conn.state.is_connected() {
                    let _ = self.events.send(ClientEvent::Recv {
                        payload,
                        channel: packet.channel,
                    });
                }
            }
            PacketBody::Termination { reason } => {
                let Some(next) = conn.state.apply(StateEvent::TerminationReceived) else {
                    return;
                };
                conn.state = next;
                let _ = conn.send(
                    Channel::UNRELIABLE_UNORDERED,
                    PacketBody::TerminationAck,
                    self.config.max_payload,
                    &self.outbound,
                    now,
                );
                debug!("Server terminated the session: {reason}");
                let _ = self
                    .events
                    .send(ClientEvent::DisconnectedByServer { reason });
                let _ = self.shutdown.send(true);
            }
            // duplicate handshake packets and keep-alives need no handling
            // beyond the ack and timestamp work above
            _ => {}
        }
    }
}

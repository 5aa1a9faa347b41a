//! The datagram I/O plane.
//!
//! [`DatagramSocket`] is the thin layer every loop sends and receives
//! through: a non-blocking UDP socket with byte counters, plus an optional
//! network conditioner that induces artificial loss and delay on outbound
//! datagrams. The conditioner exists for testing - inducing loss and
//! watching the reliability layer cope is the only honest way to test it -
//! and is transparent when unconfigured.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tokio::net::{ToSocketAddrs, UdpSocket};

/// Configuration for artificial loss and delay on outbound datagrams.
///
/// Delay is sampled from a normal distribution with mean `delay_mean` and
/// standard deviation `delay_std_dev`, both in seconds; negative samples mean
/// no delay. `loss_rate` is clamped into `0.0..=1.0`.
#[derive(Debug, Clone, Default)]
pub struct ConditionerConfig {
    /// Chance of an outbound datagram being dropped, `0.0..=1.0`.
    pub loss_rate: f32,
    /// Mean outbound delay in seconds.
    pub delay_mean: f32,
    /// Standard deviation of the outbound delay in seconds.
    pub delay_std_dev: f32,
}

#[derive(Debug)]
struct Conditioner {
    loss_rate: f32,
    delay_distr: Normal<f32>,
}

impl Conditioner {
    fn new(config: &ConditionerConfig) -> Self {
        let delay_distr = Normal::new(config.delay_mean, config.delay_std_dev.max(0.0))
            .unwrap_or_else(|_| Normal::new(0.0, 0.0).expect("zero distribution is valid"));
        Self {
            loss_rate: config.loss_rate.clamp(0.0, 1.0),
            delay_distr,
        }
    }

    fn drop_now(&self) -> bool {
        rand::thread_rng().gen::<f32>() < self.loss_rate
    }

    fn delay(&self) -> Duration {
        let secs = self.delay_distr.sample(&mut rand::thread_rng()).max(0.0);
        Duration::from_secs_f32(secs)
    }
}

/// A UDP socket with byte accounting and optional outbound conditioning.
///
/// All methods take `&self`; the underlying [`UdpSocket`] supports concurrent
/// sends and receives, which is what lets the send and receive loops share
/// one socket without a lock.
#[derive(Debug)]
pub struct DatagramSocket {
    socket: Arc<UdpSocket>,
    condition: Option<Conditioner>,
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
}

impl DatagramSocket {
    /// Binds a socket to the given local address.
    ///
    /// # Errors
    ///
    /// Errors if the underlying bind fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            condition: None,
            bytes_sent: AtomicU64::new(0),
            bytes_recv: AtomicU64::new(0),
        })
    }

    /// Installs an outbound conditioner on this socket.
    #[must_use]
    pub fn conditioned(mut self, config: &ConditionerConfig) -> Self {
        self.condition = Some(Conditioner::new(config));
        self
    }

    /// Restricts the socket to one remote peer, enabling [`send`] and
    /// [`recv`].
    ///
    /// [`send`]: Self::send
    /// [`recv`]: Self::recv
    ///
    /// # Errors
    ///
    /// Errors if the underlying connect fails.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> io::Result<()> {
        self.socket.connect(addr).await
    }

    /// Sends one datagram to the given endpoint.
    ///
    /// A conditioned datagram may silently vanish here, or go out late from a
    /// background task; either way the call reports success, exactly as a
    /// real lossy path would.
    ///
    /// # Errors
    ///
    /// Errors if the underlying send fails.
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.bytes_sent.fetch_add(buf.len() as u64, Ordering::Relaxed);
        if let Some(condition) = &self.condition {
            if condition.drop_now() {
                return Ok(buf.len());
            }
            let delay = condition.delay();
            if !delay.is_zero() {
                let socket = Arc::clone(&self.socket);
                let len = buf.len();
                let buf = buf.to_vec();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = socket.send_to(&buf, addr).await;
                });
                return Ok(len);
            }
        }
        self.socket.send_to(buf, addr).await
    }

    /// Sends one datagram to the connected peer.
    ///
    /// # Errors
    ///
    /// Errors if the underlying send fails.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.bytes_sent.fetch_add(buf.len() as u64, Ordering::Relaxed);
        if let Some(condition) = &self.condition {
            if condition.drop_now() {
                return Ok(buf.len());
            }
            let delay = condition.delay();
            if !delay.is_zero() {
                let socket = Arc::clone(&self.socket);
                let len = buf.len();
                let buf = buf.to_vec();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = socket.send(&buf).await;
                });
                return Ok(len);
            }
        }
        self.socket.send(buf).await
    }

    /// Receives one datagram, returning its length and sender.
    ///
    /// # Errors
    ///
    /// Errors if the underlying receive fails.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (len, addr) = self.socket.recv_from(buf).await?;
        self.bytes_recv.fetch_add(len as u64, Ordering::Relaxed);
        Ok((len, addr))
    }

    /// Receives one datagram from the connected peer.
    ///
    /// # Errors
    ///
    /// Errors if the underlying receive fails.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.socket.recv(buf).await?;
        self.bytes_recv.fetch_add(len as u64, Ordering::Relaxed);
        Ok(len)
    }

    /// The local address this socket is bound to.
    ///
    /// # Errors
    ///
    /// Errors if the underlying socket cannot report its address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The remote address this socket is connected to.
    ///
    /// # Errors
    ///
    /// Errors if the socket is not connected.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Total bytes offered for sending over this socket's lifetime.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes received over this socket's lifetime.
    #[must_use]
    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv.load(Ordering::Relaxed)
    }
}

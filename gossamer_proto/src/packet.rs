//! The wire codec: one datagram is exactly one encoded [`Packet`].
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! +-----+---------+-----------+------------+------span of body------+
//! | tag | seq: u64 | acks: u32 | ack0: u64.. | type-specific fields |
//! +-----+---------+-----------+------------+------------------------+
//! ```
//!
//! The tag byte carries the packet type in its low nibble and the
//! [`Channel`] flags in its high nibble. Decoding dispatches on the low
//! nibble once, here at the edge; everything downstream works with the
//! [`PacketBody`] sum type. Unknown tags and oversized length prefixes fail
//! decode, and the receive loop drops the datagram.

use bytes::{Bytes, BytesMut};

use crate::channel::Channel;
use crate::codec::{CodecError, ConstEncodeLen, ReadBytes, Result, WriteBytes};
use crate::seq::Seq;

/// Value transmitted in the `protocol_version` field of every connection
/// request. The field is reserved: compatibility is gated on the protocol id
/// alone.
pub const PROTOCOL_VERSION: u32 = 0;

/// Outcome of a connection attempt, carried in a
/// [`PacketBody::ConnectionResponse`] and returned from the client's connect
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// The connection was accepted and a client id was assigned.
    Success = 0,
    /// The client's protocol id is neither the server's primary nor one of
    /// its supported secondaries.
    UnsupportedProtocolVersion = 1,
    /// The challenge response did not authenticate.
    InvalidAuthentication = 2,
    /// The server never answered within the connect timeout. Never sent on
    /// the wire.
    NoResponse = 3,
}

impl ResultCode {
    /// Maps a wire value back to a result code.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::UnsupportedProtocolVersion),
            2 => Some(Self::InvalidAuthentication),
            3 => Some(Self::NoResponse),
            _ => None,
        }
    }
}

/// Packet type, the low nibble of the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Client asks to connect, carrying its protocol id.
    ConnectionRequest = 0,
    /// Server challenges the client to authenticate.
    Challenge = 1,
    /// Client answers the challenge.
    ChallengeResponse = 2,
    /// Server reports the outcome of the handshake.
    ConnectionResponse = 3,
    /// Empty packet keeping the session alive and carrying acks.
    KeepAlive = 4,
    /// Application payload.
    ApplicationData = 5,
    /// Graceful termination with a reason.
    Termination = 6,
    /// Acknowledges a termination.
    TerminationAck = 7,
    /// Stateless out-of-band server info query.
    InfoRequest = 8,
    /// Answer to an info query.
    InfoResponse = 9,
}

impl PacketType {
    const fn from_low_nibble(tag: u8) -> Option<Self> {
        match tag & 0x0F {
            0 => Some(Self::ConnectionRequest),
            1 => Some(Self::Challenge),
            2 => Some(Self::ChallengeResponse),
            3 => Some(Self::ConnectionResponse),
            4 => Some(Self::KeepAlive),
            5 => Some(Self::ApplicationData),
            6 => Some(Self::Termination),
            7 => Some(Self::TerminationAck),
            8 => Some(Self::InfoRequest),
            9 => Some(Self::InfoResponse),
            _ => None,
        }
    }
}

/// Type-specific body of a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    /// Client asks to connect.
    ConnectionRequest {
        /// Application protocol id the client speaks.
        protocol_id: u32,
        /// Reserved, transmitted as [`PROTOCOL_VERSION`].
        protocol_version: u32,
    },
    /// Server challenges the client. May be empty when the server runs
    /// without authentication.
    Challenge(Bytes),
    /// Client's answer to the challenge.
    ChallengeResponse(Bytes),
    /// Outcome of the handshake.
    ConnectionResponse {
        /// Outcome code.
        code: ResultCode,
        /// Assigned client id, meaningful only on [`ResultCode::Success`].
        client_id: u64,
    },
    /// Keeps the session alive; also the carrier for ping when sent reliable.
    KeepAlive,
    /// Application payload.
    ApplicationData(Bytes),
    /// Graceful termination.
    Termination {
        /// Human-readable reason.
        reason: String,
    },
    /// Acknowledges a termination.
    TerminationAck,
    /// Server info query.
    InfoRequest,
    /// Opaque application-defined info blob.
    InfoResponse(Bytes),
}

impl PacketBody {
    /// The packet type tagging this body on the wire.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::ConnectionRequest { .. } => PacketType::ConnectionRequest,
            Self::Challenge(_) => PacketType::Challenge,
            Self::ChallengeResponse(_) => PacketType::ChallengeResponse,
            Self::ConnectionResponse { .. } => PacketType::ConnectionResponse,
            Self::KeepAlive => PacketType::KeepAlive,
            Self::ApplicationData(_) => PacketType::ApplicationData,
            Self::Termination { .. } => PacketType::Termination,
            Self::TerminationAck => PacketType::TerminationAck,
            Self::InfoRequest => PacketType::InfoRequest,
            Self::InfoResponse(_) => PacketType::InfoResponse,
        }
    }
}

/// One decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number assigned by the sender.
    pub seq: Seq,
    /// Delivery discipline flags.
    pub channel: Channel,
    /// Sequence numbers of the sender's recently received reliable packets,
    /// piggybacked on every outgoing packet.
    pub acks: Vec<Seq>,
    /// Type-specific body.
    pub body: PacketBody,
}

impl Packet {
    /// Encodes this packet into a fresh datagram buffer.
    ///
    /// # Errors
    ///
    /// Errors if a variable-length field exceeds `max_payload`.
    pub fn encode(&self, max_payload: usize) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(13 + self.acks.len() * Seq::ENCODE_LEN + body_cap(&self.body));
        let tag = self.body.packet_type() as u8 | self.channel.bits();
        buf.write_u8(tag)?;
        buf.write_u64(self.seq.0)?;
        let acks = u32::try_from(self.acks.len()).map_err(|_| CodecError::TooLong {
            len: self.acks.len(),
            max: u32::MAX as usize,
        })?;
        buf.write_u32(acks)?;
        for ack in &self.acks {
            buf.write(ack)?;
        }
        match &self.body {
            PacketBody::ConnectionRequest {
                protocol_id,
                protocol_version,
            } => {
                buf.write_u32(*protocol_id)?;
                buf.write_u32(*protocol_version)?;
            }
            PacketBody::Challenge(challenge) => {
                write_bounded(&mut buf, challenge, max_payload)?;
            }
            PacketBody::ChallengeResponse(response) => {
                write_bounded(&mut buf, response, max_payload)?;
            }
            PacketBody::ConnectionResponse { code, client_id } => {
                buf.write_u32(u32::from(*code as u8))?;
                buf.write_u64(*client_id)?;
            }
            PacketBody::ApplicationData(data) => {
                write_bounded(&mut buf, data, max_payload)?;
            }
            PacketBody::Termination { reason } => {
                write_bounded(&mut buf, reason.as_bytes(), max_payload)?;
            }
            PacketBody::InfoResponse(blob) => {
                write_bounded(&mut buf, blob, max_payload)?;
            }
            PacketBody::KeepAlive | PacketBody::TerminationAck | PacketBody::InfoRequest => {}
        }
        Ok(buf.freeze())
    }

    /// Decodes one datagram.
    ///
    /// Fail-soft by contract: any malformed, truncated, unknown-tag or
    /// over-bound datagram returns an error for the receive loop to drop.
    ///
    /// # Errors
    ///
    /// Errors on any datagram that is not a well-formed packet within the
    /// `max_payload` bound.
    pub fn decode(datagram: impl Into<Bytes>, max_payload: usize) -> Result<Self> {
        let mut buf: Bytes = datagram.into();
        let tag = buf.read_u8()?;
        let packet_type = PacketType::from_low_nibble(tag).ok_or(CodecError::UnknownTag(tag))?;
        let channel = Channel::from_tag(tag)?;
        let seq = buf.read::<Seq>()?;
        let ack_count = buf.read_u32()? as usize;
        // bound the allocation by what the datagram can actually hold
        if ack_count.saturating_mul(Seq::ENCODE_LEN) > buf.len() {
            return Err(CodecError::BufferTooShort);
        }
        let mut acks = Vec::with_capacity(ack_count);
        for _ in 0..ack_count {
            acks.push(buf.read::<Seq>()?);
        }
        let body = match packet_type {
            PacketType::ConnectionRequest => PacketBody::ConnectionRequest {
                protocol_id: buf.read_u32()?,
                protocol_version: buf.read_u32()?,
            },
            PacketType::Challenge => PacketBody::Challenge(buf.read_prefixed(max_payload)?),
            PacketType::ChallengeResponse => {
                PacketBody::ChallengeResponse(buf.read_prefixed(max_payload)?)
            }
            PacketType::ConnectionResponse => {
                let code = buf.read_u32()?;
                PacketBody::ConnectionResponse {
                    code: ResultCode::from_u32(code)
                        .ok_or(CodecError::UnknownResultCode(code))?,
                    client_id: buf.read_u64()?,
                }
            }
            PacketType::KeepAlive => PacketBody::KeepAlive,
            PacketType::ApplicationData => {
                PacketBody::ApplicationData(buf.read_prefixed(max_payload)?)
            }
            PacketType::Termination => {
                let reason = buf.read_prefixed(max_payload)?;
                PacketBody::Termination {
                    reason: String::from_utf8(reason.to_vec())
                        .map_err(|_| CodecError::InvalidUtf8)?,
                }
            }
            PacketType::TerminationAck => PacketBody::TerminationAck,
            PacketType::InfoRequest => PacketBody::InfoRequest,
            PacketType::InfoResponse => PacketBody::InfoResponse(buf.read_prefixed(max_payload)?),
        };
        Ok(Self {
            seq,
            channel,
            acks,
            body,
        })
    }
}

fn write_bounded(buf: &mut BytesMut, src: &[u8], max_payload: usize) -> Result<()> {
    if src.len() > max_payload {
        return Err(CodecError::TooLong {
            len: src.len(),
            max: max_payload,
        });
    }
    buf.write_prefixed(src)
}

fn body_cap(body: &PacketBody) -> usize {
    match body {
        PacketBody::Challenge(b) | PacketBody::ChallengeResponse(b)
        | PacketBody::ApplicationData(b) | PacketBody::InfoResponse(b) => 4 + b.len(),
        PacketBody::Termination { reason } => 4 + reason.len(),
        PacketBody::ConnectionRequest { .. } => 8,
        PacketBody::ConnectionResponse { .. } => 12,
        PacketBody::KeepAlive | PacketBody::TerminationAck | PacketBody::InfoRequest => 0,
    }
}

use crate::codec::{CodecError, Result};

/// Delivery discipline chosen per outgoing packet.
///
/// A channel is the combination of two independent flags:
/// * *reliable* - the packet is retransmitted until the peer acknowledges its
///   sequence number
/// * *ordered* - stale packets are dropped by the receiver instead of being
///   delivered out of order
///
/// The four combinations give the classic delivery disciplines:
///
/// | Channel | Reliable | Ordered | Use for |
/// |---|---|---|---|
/// | [`UNRELIABLE_UNORDERED`] | | | fire-and-forget state spam |
/// | [`UNRELIABLE_ORDERED`] | | ✅ | positional updates, newest wins |
/// | [`RELIABLE_UNORDERED`] | ✅ | | one-off events, order irrelevant |
/// | [`RELIABLE_ORDERED`] | ✅ | ✅ | chat, commands, strict FIFO |
///
/// On the wire the flags occupy the high nibble of the packet tag byte
/// (`Reliable = 0x10`, `Ordered = 0x20`), combinable.
///
/// [`UNRELIABLE_UNORDERED`]: Channel::UNRELIABLE_UNORDERED
/// [`UNRELIABLE_ORDERED`]: Channel::UNRELIABLE_ORDERED
/// [`RELIABLE_UNORDERED`]: Channel::RELIABLE_UNORDERED
/// [`RELIABLE_ORDERED`]: Channel::RELIABLE_ORDERED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    /// Whether the sender retransmits this packet until it is acknowledged.
    pub reliable: bool,
    /// Whether the receiver drops packets older than the last accepted one.
    pub ordered: bool,
}

const RELIABLE: u8 = 0x10;
const ORDERED: u8 = 0x20;

impl Channel {
    /// No delivery guarantees.
    pub const UNRELIABLE_UNORDERED: Self = Self {
        reliable: false,
        ordered: false,
    };
    /// Only packets newer than the last accepted one are delivered; skipped
    /// packets are abandoned.
    pub const UNRELIABLE_ORDERED: Self = Self {
        reliable: false,
        ordered: true,
    };
    /// Every packet is eventually delivered, in no particular order.
    pub const RELIABLE_UNORDERED: Self = Self {
        reliable: true,
        ordered: false,
    };
    /// Every packet is delivered exactly once, in send order.
    pub const RELIABLE_ORDERED: Self = Self {
        reliable: true,
        ordered: true,
    };

    /// Wire bits of this channel, occupying the high nibble of the tag byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        (if self.reliable { RELIABLE } else { 0 }) | (if self.ordered { ORDERED } else { 0 })
    }

    /// Reads channel flags back out of a tag byte.
    ///
    /// # Errors
    ///
    /// Errors if bits outside the defined flag set are present.
    pub const fn from_tag(tag: u8) -> Result<Self> {
        if tag & !(RELIABLE | ORDERED | 0x0F) != 0 {
            return Err(CodecError::UnknownTag(tag));
        }
        Ok(Self {
            reliable: tag & RELIABLE != 0,
            ordered: tag & ORDERED != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        for channel in [
            Channel::UNRELIABLE_UNORDERED,
            Channel::UNRELIABLE_ORDERED,
            Channel::RELIABLE_UNORDERED,
            Channel::RELIABLE_ORDERED,
        ] {
            assert_eq!(Ok(channel), Channel::from_tag(channel.bits()));
        }
    }

    #[test]
    fn rejects_undefined_flag_bits() {
        assert_eq!(
            Err(CodecError::UnknownTag(0x45)),
            Channel::from_tag(0x40 | 0x05),
        );
    }

    #[test]
    fn flag_values() {
        assert_eq!(0x10, Channel::RELIABLE_UNORDERED.bits());
        assert_eq!(0x20, Channel::UNRELIABLE_ORDERED.bits());
        assert_eq!(0x30, Channel::RELIABLE_ORDERED.bits());
    }
}

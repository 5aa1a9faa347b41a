use std::fmt;

use crate::codec::{ConstEncodeLen, Decode, Encode, ReadBytes, Result, WriteBytes};

/// Sequence number identifying a packet sent to a peer.
///
/// Each peer numbers its reliable and its unreliable packets from separate
/// counters (the channel flag on the wire says which space a number belongs
/// to), each starting at 1 and strictly increasing for the lifetime of the
/// session - a retransmission reuses the original number, a new packet never
/// does. The number is stored as a [`u64`], which will not wrap within any
/// realistic session, so ordering comparisons are plain integer comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seq(pub u64);

impl Seq {
    /// The zero sequence, ordered before any assigned sequence number.
    pub const ZERO: Self = Self(0);

    /// Returns the current value and increments `self`.
    #[must_use]
    pub fn next(&mut self) -> Seq {
        let cur = *self;
        self.0 += 1;
        cur
    }

    /// The sequence number directly after this one.
    #[must_use]
    pub const fn successor(self) -> Seq {
        Seq(self.0 + 1)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ConstEncodeLen for Seq {
    const ENCODE_LEN: usize = u64::ENCODE_LEN;
}

impl Encode for Seq {
    fn encode(&self, buf: &mut impl WriteBytes) -> Result<()> {
        buf.write_u64(self.0)
    }
}

impl Decode for Seq {
    fn decode(buf: &mut impl ReadBytes) -> Result<Self> {
        buf.read_u64().map(Seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_post_increment() {
        let mut counter = Seq(1);
        assert_eq!(Seq(1), counter.next());
        assert_eq!(Seq(2), counter.next());
        assert_eq!(Seq(3), counter.next());
    }

    #[test]
    fn ordering() {
        assert!(Seq(2) > Seq(1));
        assert_eq!(Seq(5), Seq(4).successor());
    }
}

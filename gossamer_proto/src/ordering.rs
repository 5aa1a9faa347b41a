//! Admission filter deciding which inbound packets the session layer sees.

use std::collections::BTreeSet;

use tracing::trace;

use crate::channel::Channel;
use crate::seq::Seq;

/// Per-peer filter admitting or dropping inbound packets by channel
/// discipline.
///
/// Reliable and unreliable packets number themselves from separate sequence
/// spaces (the channel flag in the tag byte says which), so the filter keeps
/// independent state for the two:
///
/// * The reliable cursor `pending_reliable` is the next reliable sequence
///   not yet seen in order. Every admitted reliable packet advances it -
///   directly when it is the exact successor, or later via `reliable_ahead`,
///   which holds admitted reliable sequences waiting for the gap below them
///   to fill. A reliable-ordered packet is admitted only at the cursor;
///   a reliable-unordered packet is admitted always.
/// * The unreliable side keeps only a high-water mark for the ordered
///   discipline.
///
/// There is no payload buffering here on purpose: a reliable-ordered gap is
/// closed by the sender's retransmissions, which re-present the missing
/// packet until it sits exactly at the cursor and gets admitted. An
/// unreliable-ordered gap is simply abandoned - newest wins.
#[derive(Debug)]
pub struct OrderingFilter {
    /// Next in-order reliable sequence; everything below has been admitted.
    pending_reliable: Seq,
    /// Admitted reliable sequences above `pending_reliable`.
    reliable_ahead: BTreeSet<Seq>,
    last_unreliable_ordered: Seq,
}

impl Default for OrderingFilter {
    fn default() -> Self {
        Self {
            pending_reliable: Seq(1),
            reliable_ahead: BTreeSet::new(),
            last_unreliable_ordered: Seq::ZERO,
        }
    }
}

impl OrderingFilter {
    /// Creates a filter that has not accepted anything yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a packet on `channel` with sequence `seq` is admitted,
    /// updating the filter state when it is.
    ///
    /// * reliable + ordered: admit only at the reliable cursor
    /// * reliable, unordered: always admit (the cursor still takes note)
    /// * unreliable + ordered: admit anything newer than the last accepted
    /// * unreliable, unordered: always admit
    pub fn admit(&mut self, channel: Channel, seq: Seq) -> bool {
        if channel.reliable {
            if channel.ordered {
                if seq == self.pending_reliable {
                    self.pending_reliable = seq.successor();
                    self.drain_ahead();
                    true
                } else {
                    trace!(
                        seq = %seq,
                        pending = %self.pending_reliable,
                        "Dropped out-of-order reliable packet",
                    );
                    false
                }
            } else {
                if seq >= self.pending_reliable {
                    self.reliable_ahead.insert(seq);
                    self.drain_ahead();
                }
                true
            }
        } else if !channel.ordered {
            true
        } else if seq > self.last_unreliable_ordered {
            self.last_unreliable_ordered = seq;
            true
        } else {
            trace!(seq = %seq, "Dropped stale packet");
            false
        }
    }

    fn drain_ahead(&mut self) {
        while self.reliable_ahead.remove(&self.pending_reliable) {
            self.pending_reliable = self.pending_reliable.successor();
        }
    }
}

//! The two per-peer reliability tables.
//!
//! [`SentQueue`] holds our reliable packets until the peer acknowledges them;
//! [`AckQueue`] remembers the peer's recent reliable sequences so every
//! outgoing packet can acknowledge them in its header. There are no dedicated
//! ack packets - acknowledgement rides on whatever traffic flows the other
//! way, keep-alives included.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::packet::Packet;
use crate::seq::Seq;

/// A reliable packet we have sent and which the peer has not acknowledged
/// yet.
#[derive(Debug, Clone)]
pub struct SentPacket {
    /// The packet exactly as first sent. Retransmissions reuse it, sequence
    /// number and all.
    pub packet: Packet,
    /// When the packet was last handed to the I/O plane.
    pub sent_at: Instant,
    /// Whether this packet has been retransmitted at least once. A resent
    /// packet's eventual ack is useless as an RTT sample, since we cannot
    /// tell which transmission it answers.
    pub resent: bool,
}

/// Table of sent reliable packets awaiting acknowledgement.
///
/// Keyed by sequence number; since sequences are assigned strictly
/// increasing, iteration order is also send order.
#[derive(Debug, Default)]
pub struct SentQueue {
    queue: BTreeMap<Seq, SentPacket>,
}

impl SentQueue {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a packet with its send timestamp.
    ///
    /// Returns `false` and leaves the table untouched if the sequence is
    /// already stored.
    pub fn insert(&mut self, packet: Packet, now: Instant) -> bool {
        let seq = packet.seq;
        if self.queue.contains_key(&seq) {
            return false;
        }
        self.queue.insert(
            seq,
            SentPacket {
                packet,
                sent_at: now,
                resent: false,
            },
        );
        true
    }

    /// Removes every entry whose sequence appears in `acks`, returning the
    /// removed entries in sequence order.
    ///
    /// Each returned entry is a `SequenceNumberAcked` notification; the
    /// client's ping sampler turns un-resent ones into RTT samples.
    pub fn ingest_acks(&mut self, acks: &[Seq]) -> Vec<SentPacket> {
        let mut retired = Vec::new();
        for ack in acks {
            if let Some(sent) = self.queue.remove(ack) {
                trace!(seq = %ack, "Peer acked");
                retired.push(sent);
            }
        }
        retired
    }

    /// Sequences whose last transmission is older than the resend budget.
    #[must_use]
    pub fn due_for_resend(&self, now: Instant, budget: Duration) -> Vec<Seq> {
        self.queue
            .iter()
            .filter(|(_, sent)| now.duration_since(sent.sent_at) >= budget)
            .map(|(seq, _)| *seq)
            .collect()
    }

    /// Refreshes the timestamp of an entry about to be retransmitted and
    /// returns a clone of the original packet.
    pub fn mark_resent(&mut self, seq: Seq, now: Instant) -> Option<Packet> {
        let sent = self.queue.get_mut(&seq)?;
        sent.sent_at = now;
        sent.resent = true;
        Some(sent.packet.clone())
    }

    /// Number of packets awaiting acknowledgement.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is awaiting acknowledgement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Bounded set of recently received reliable sequences, waiting to be
/// piggybacked onto outgoing packets.
///
/// Holds at most `capacity` entries; pushing beyond that evicts the lowest
/// sequence. Reads do not drain it - a sequence keeps being acknowledged on
/// every outgoing packet until newer sequences push it out, which gives the
/// ack channel its redundancy under loss.
#[derive(Debug)]
pub struct AckQueue {
    seqs: BTreeSet<Seq>,
    capacity: usize,
}

impl AckQueue {
    /// Creates an empty queue holding up to `capacity` sequences.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seqs: BTreeSet::new(),
            capacity,
        }
    }

    /// Records a received reliable sequence. Idempotent; evicts the lowest
    /// stored sequence when over capacity.
    pub fn push(&mut self, seq: Seq) {
        self.seqs.insert(seq);
        while self.seqs.len() > self.capacity {
            if let Some(evicted) = self.seqs.pop_first() {
                trace!(seq = %evicted, "Evicted from ack queue");
            }
        }
    }

    /// The sequences to acknowledge on the next outgoing packet, most recent
    /// first.
    #[must_use]
    pub fn next_acks(&self) -> Vec<Seq> {
        self.seqs.iter().rev().copied().collect()
    }

    /// Number of sequences waiting to be acknowledged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    /// Whether no sequences are waiting to be acknowledged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::channel::Channel;
    use crate::packet::PacketBody;

    use super::*;

    fn reliable(seq: u64) -> Packet {
        Packet {
            seq: Seq(seq),
            channel: Channel::RELIABLE_ORDERED,
            acks: Vec::new(),
            body: PacketBody::ApplicationData(Bytes::from_static(b"data")),
        }
    }

    #[test]
    fn rejects_duplicate_sequence() {
        let now = Instant::now();
        let mut queue = SentQueue::new();
        assert!(queue.insert(reliable(1), now));
        assert!(!queue.insert(reliable(1), now));
        assert_eq!(1, queue.len());
    }

    #[test]
    fn ack_removes_exactly_the_acked() {
        let now = Instant::now();
        let mut queue = SentQueue::new();
        for seq in 1..=4 {
            queue.insert(reliable(seq), now);
        }
        let retired = queue.ingest_acks(&[Seq(2), Seq(4), Seq(9)]);
        assert_eq!(
            vec![Seq(2), Seq(4)],
            retired.iter().map(|sent| sent.packet.seq).collect::<Vec<_>>(),
        );
        assert_eq!(2, queue.len());
        // acking again is a no-op
        assert!(queue.ingest_acks(&[Seq(2)]).is_empty());
    }

    #[test]
    fn resend_selection_respects_budget() {
        let budget = Duration::from_millis(100);
        let start = Instant::now();
        let mut queue = SentQueue::new();
        queue.insert(reliable(1), start);
        queue.insert(reliable(2), start + Duration::from_millis(80));

        let now = start + Duration::from_millis(120);
        assert_eq!(vec![Seq(1)], queue.due_for_resend(now, budget));

        let packet = queue.mark_resent(Seq(1), now).unwrap();
        assert_eq!(Seq(1), packet.seq);
        assert!(queue.due_for_resend(now, budget).is_empty());
    }

    #[test]
    fn ack_queue_caps_at_capacity_evicting_lowest() {
        let mut queue = AckQueue::new(32);
        for seq in 1..=40 {
            queue.push(Seq(seq));
        }
        assert_eq!(32, queue.len());
        let acks = queue.next_acks();
        assert_eq!(Seq(40), acks[0]);
        assert_eq!(Seq(9), *acks.last().unwrap());
    }

    #[test]
    fn ack_queue_push_is_idempotent() {
        let mut queue = AckQueue::new(32);
        queue.push(Seq(7));
        queue.push(Seq(7));
        assert_eq!(1, queue.len());
    }
}

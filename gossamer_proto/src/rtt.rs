//! Round-trip time estimation over a sliding window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Moving average of round-trip samples over a fixed time window.
///
/// The client's ping duty feeds this with one sample per acknowledged ping;
/// samples older than the window fall off. The average reacts quickly to
/// congestion without a single outlier dominating it.
#[derive(Debug)]
pub struct RttWindow {
    window: Duration,
    samples: VecDeque<(Instant, Duration)>,
}

impl RttWindow {
    /// Creates an empty window of the given width.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Adds a round-trip sample taken at `now`.
    pub fn push(&mut self, now: Instant, sample: Duration) {
        self.samples.push_back((now, sample));
        self.expire(now);
    }

    /// The rolling average over samples still inside the window, or zero when
    /// no sample is that fresh.
    pub fn average(&mut self, now: Instant) -> Duration {
        self.expire(now);
        let len = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);
        if len == 0 {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().map(|(_, sample)| *sample).sum();
        total / len
    }

    fn expire(&mut self, now: Instant) {
        while let Some((taken_at, _)) = self.samples.front() {
            if now.duration_since(*taken_at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

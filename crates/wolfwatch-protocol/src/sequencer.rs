//! Restores per-session order over a push stream that may reorder, repeat,
//! or drop envelopes.
//!
//! The game server numbers every sequenced envelope from 1 upward. The
//! [`OrderedQueue`] releases them strictly in that order:
//!
//! ```text
//!   arrivals:  1   3   5   2   4   3
//!              │   │   │   │   │   └─ below next_expected → duplicate, dropped
//!              │   │   │   │   └───── fills gap → releases 4, 5
//!              │   │   │   └───────── fills gap → releases 2, 3
//!              │   │   └───────────── ahead → buffered
//!              │   └───────────────── ahead → buffered
//!              └───────────────────── next_expected → released
//! ```
//!
//! Envelopes without a sequence number bypass ordering entirely.
//!
//! A missing number can't be waited for forever. A gap is held for at most
//! [`QueueConfig::gap_timeout`] and the buffer holds at most
//! [`QueueConfig::max_buffered`] envelopes; when either bound trips, the
//! missing range is reported as [`QueueOutput::Skipped`] and the queue jumps
//! to the lowest buffered number.
//!
//! The queue owns no clock. Callers pass `Instant`s in and ask
//! [`OrderedQueue::next_deadline`] when they should call
//! [`OrderedQueue::expire`], which keeps this type synchronous and testable.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::Envelope;

/// Bounds on how long and how much the queue buffers behind a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a gap may stall delivery before it is skipped.
    pub gap_timeout: Duration,
    /// How many out-of-order envelopes may be buffered before the oldest gap
    /// is skipped.
    pub max_buffered: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            gap_timeout: Duration::from_secs(5),
            max_buffered: 256,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn with_gap_timeout(mut self, gap_timeout: Duration) -> Self {
        self.gap_timeout = gap_timeout;
        self
    }

    #[must_use]
    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered.max(1);
        self
    }
}

/// What the queue hands back to its caller, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutput {
    /// An envelope ready to be classified.
    Released(Envelope),
    /// Sequence numbers `from..=to` were given up on.
    Skipped { from: u64, to: u64 },
}

/// Running counters, reset only with the queue itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Envelopes released, sequenced or not.
    pub released: u64,
    /// Envelopes dropped as duplicates.
    pub duplicates: u64,
    /// Sequence numbers skipped over.
    pub skipped: u64,
    /// Number of `reset` calls.
    pub resets: u64,
}

/// Per-session reordering buffer.
#[derive(Debug)]
pub struct OrderedQueue {
    config: QueueConfig,
    next_expected: u64,
    buffer: BTreeMap<u64, Envelope>,
    /// When the current gap started stalling delivery. `None` when nothing
    /// is buffered.
    stalled_since: Option<Instant>,
    stats: QueueStats,
}

impl Default for OrderedQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl OrderedQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            next_expected: 1,
            buffer: BTreeMap::new(),
            stalled_since: None,
            stats: QueueStats::default(),
        }
    }

    /// Feeds one envelope in and returns everything that became deliverable.
    pub fn push(&mut self, envelope: Envelope, now: Instant) -> Vec<QueueOutput> {
        let Some(seq) = envelope.sequence() else {
            self.stats.released += 1;
            return vec![QueueOutput::Released(envelope)];
        };

        let mut out = Vec::new();

        if seq < self.next_expected {
            self.stats.duplicates += 1;
            tracing::debug!(seq, next_expected = self.next_expected, "dropping stale envelope");
            return out;
        }

        if seq == self.next_expected {
            self.release(envelope, &mut out);
            self.drain(&mut out);
            self.restart_stall(now);
            return out;
        }

        if self.buffer.contains_key(&seq) {
            self.stats.duplicates += 1;
            tracing::debug!(seq, "dropping duplicate buffered envelope");
            return out;
        }

        self.buffer.insert(seq, envelope);
        if self.stalled_since.is_none() {
            self.stalled_since = Some(now);
        }
        tracing::debug!(
            seq,
            next_expected = self.next_expected,
            buffered = self.buffer.len(),
            "buffering out-of-order envelope"
        );

        if self.buffer.len() > self.config.max_buffered {
            tracing::warn!(
                buffered = self.buffer.len(),
                max = self.config.max_buffered,
                "reorder buffer full, skipping gap"
            );
            self.skip_gap(&mut out);
            self.restart_stall(now);
        }

        out
    }

    /// Skips the current gap if it has stalled past its deadline.
    pub fn expire(&mut self, now: Instant) -> Vec<QueueOutput> {
        let mut out = Vec::new();
        match self.next_deadline() {
            Some(deadline) if now >= deadline => {
                tracing::warn!(
                    next_expected = self.next_expected,
                    buffered = self.buffer.len(),
                    "gap timed out, skipping"
                );
                self.skip_gap(&mut out);
                self.restart_stall(now);
            }
            _ => {}
        }
        out
    }

    /// When [`expire`](Self::expire) should next be called, if a gap is open.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.stalled_since.map(|since| since + self.config.gap_timeout)
    }

    /// Starts over for a fresh connection: counter back to 1, buffer cleared.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(discarded = self.buffer.len(), "discarding buffered envelopes on reset");
        }
        self.next_expected = 1;
        self.buffer.clear();
        self.stalled_since = None;
        self.stats.resets += 1;
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn release(&mut self, envelope: Envelope, out: &mut Vec<QueueOutput>) {
        self.next_expected += 1;
        self.stats.released += 1;
        out.push(QueueOutput::Released(envelope));
    }

    fn drain(&mut self, out: &mut Vec<QueueOutput>) {
        while let Some(envelope) = self.buffer.remove(&self.next_expected) {
            self.release(envelope, out);
        }
    }

    /// Jumps over the missing range to the lowest buffered number.
    fn skip_gap(&mut self, out: &mut Vec<QueueOutput>) {
        let Some(&lowest) = self.buffer.keys().next() else {
            return;
        };
        let from = self.next_expected;
        let to = lowest - 1;
        self.stats.skipped += lowest - from;
        self.next_expected = lowest;
        out.push(QueueOutput::Skipped { from, to });
        self.drain(out);
    }

    /// Progress was made; a gap still open starts a fresh wait.
    fn restart_stall(&mut self, now: Instant) {
        self.stalled_since = if self.buffer.is_empty() {
            None
        } else {
            Some(now)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(seq: u64) -> Envelope {
        Envelope::new("vote_cast", json!({ "sequence_number": seq }))
    }

    fn released(out: &[QueueOutput]) -> Vec<u64> {
        out.iter()
            .filter_map(|o| match o {
                QueueOutput::Released(e) => e.sequence(),
                QueueOutput::Skipped { .. } => None,
            })
            .collect()
    }

    fn feed(queue: &mut OrderedQueue, seqs: &[u64], now: Instant) -> Vec<QueueOutput> {
        seqs.iter()
            .flat_map(|&s| queue.push(env(s), now))
            .collect()
    }

    /// Every ordering of `items`, by Heap's algorithm.
    fn permutations(items: &mut Vec<u64>, k: usize, acc: &mut Vec<Vec<u64>>) {
        if k == 1 {
            acc.push(items.clone());
            return;
        }
        for i in 0..k {
            permutations(items, k - 1, acc);
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
        }
    }

    #[test]
    fn test_push_any_permutation_releases_in_order() {
        let mut all = Vec::new();
        permutations(&mut (1..=5).collect(), 5, &mut all);
        assert_eq!(all.len(), 120);

        let now = Instant::now();
        for order in all {
            let mut queue = OrderedQueue::default();
            let out = feed(&mut queue, &order, now);
            assert_eq!(released(&out), vec![1, 2, 3, 4, 5], "order {order:?}");
            assert_eq!(queue.buffered(), 0);
            assert!(queue.next_deadline().is_none());
        }
    }

    #[test]
    fn test_push_gap_fill_releases_buffered() {
        let now = Instant::now();
        let mut queue = OrderedQueue::default();

        assert_eq!(released(&queue.push(env(1), now)), vec![1]);
        assert!(queue.push(env(3), now).is_empty());
        assert_eq!(queue.buffered(), 1);
        assert_eq!(released(&queue.push(env(2), now)), vec![2, 3]);
        assert_eq!(queue.next_expected(), 4);
    }

    #[test]
    fn test_push_duplicates_are_dropped() {
        let now = Instant::now();
        let mut queue = OrderedQueue::default();

        let out = feed(&mut queue, &[1, 1, 3, 3, 2, 2], now);
        assert_eq!(released(&out), vec![1, 2, 3]);
        assert_eq!(queue.stats().duplicates, 3);
        assert_eq!(queue.stats().released, 3);
    }

    #[test]
    fn test_push_unsequenced_bypasses_queue() {
        let now = Instant::now();
        let mut queue = OrderedQueue::default();
        queue.push(env(2), now);

        let out = queue.push(Envelope::new("ping", serde_json::Value::Null), now);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], QueueOutput::Released(e) if e.kind == "ping"));
        assert_eq!(queue.next_expected(), 1);
    }

    #[test]
    fn test_reset_discards_stale_buffer() {
        let now = Instant::now();
        let mut queue = OrderedQueue::default();
        feed(&mut queue, &[1, 2, 5, 6], now);
        assert_eq!(queue.buffered(), 2);

        queue.reset();
        assert_eq!(queue.next_expected(), 1);
        assert_eq!(queue.buffered(), 0);
        assert!(queue.next_deadline().is_none());
        assert_eq!(queue.stats().resets, 1);

        // The new connection starts numbering from 1 again.
        assert_eq!(released(&queue.push(env(1), now)), vec![1]);
    }

    #[test]
    fn test_expire_before_deadline_does_nothing() {
        let start = Instant::now();
        let mut queue = OrderedQueue::default();
        feed(&mut queue, &[1, 3], start);

        let deadline = queue.next_deadline().unwrap();
        assert_eq!(deadline, start + Duration::from_secs(5));
        assert!(queue.expire(start + Duration::from_secs(4)).is_empty());
        assert_eq!(queue.next_expected(), 2);
    }

    #[test]
    fn test_expire_after_deadline_skips_gap() {
        let start = Instant::now();
        let mut queue = OrderedQueue::default();
        feed(&mut queue, &[1, 4, 5], start);

        let out = queue.expire(start + Duration::from_secs(5));
        assert_eq!(out[0], QueueOutput::Skipped { from: 2, to: 3 });
        assert_eq!(released(&out), vec![4, 5]);
        assert_eq!(queue.next_expected(), 6);
        assert_eq!(queue.stats().skipped, 2);
        assert!(queue.next_deadline().is_none());

        // A late arrival from the skipped range is now a duplicate.
        assert!(queue.push(env(2), start + Duration::from_secs(6)).is_empty());
    }

    #[test]
    fn test_expire_partial_skip_restarts_timer() {
        let start = Instant::now();
        let mut queue = OrderedQueue::default();
        feed(&mut queue, &[1, 3, 5], start);

        let later = start + Duration::from_secs(5);
        let out = queue.expire(later);
        assert_eq!(out[0], QueueOutput::Skipped { from: 2, to: 2 });
        assert_eq!(released(&out), vec![3]);
        // 4 is still missing; its wait starts now.
        assert_eq!(queue.next_deadline(), Some(later + Duration::from_secs(5)));
    }

    #[test]
    fn test_push_overflow_skips_gap() {
        let now = Instant::now();
        let mut queue = OrderedQueue::new(QueueConfig::default().with_max_buffered(2));
        feed(&mut queue, &[1], now);

        assert!(queue.push(env(3), now).is_empty());
        assert!(queue.push(env(4), now).is_empty());
        let out = queue.push(env(5), now);

        assert_eq!(out[0], QueueOutput::Skipped { from: 2, to: 2 });
        assert_eq!(released(&out), vec![3, 4, 5]);
        assert_eq!(queue.buffered(), 0);
    }
}

//! Debug side-channels.
//!
//! Both channels are bounded and never block the datapath: the arrival tap
//! drops its oldest entry when full, and the burst profile only keeps
//! fixed-size histograms.

use crate::convert::ConvertedHit;
use std::collections::VecDeque;

/// Number of log2 bins in every histogram.
pub const PROFILE_BINS: usize = 16;

/// A bounded ring that overwrites its oldest entry.
#[derive(Debug, Clone)]
pub struct DebugTap<T> {
    entries: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> DebugTap<T> {
    /// Creates a tap holding at most `capacity` entries. Zero disables it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Records one entry.
    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    /// Takes every buffered entry, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain(..).collect()
    }

    /// Buffered entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries lost to overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forgets every entry and the drop count.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }
}

/// Reference clock at arrival compared with the hit's converted timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalDelta {
    /// Link the hit arrived on.
    pub link: u8,
    /// Reference clock when the hit was admitted.
    pub reference: u64,
    /// Converted timestamp.
    pub timestamp: u64,
    /// `reference - timestamp`, the upstream latency of this hit.
    pub delta: i64,
}

impl ArrivalDelta {
    /// Builds the entry for an emitted hit.
    #[must_use]
    pub fn from_hit(hit: &ConvertedHit) -> Self {
        let reference = hit.tag.arrival_reference;
        let timestamp = hit.hit.timestamp;
        Self {
            link: hit.tag.link,
            reference,
            timestamp,
            delta: reference.wrapping_sub(timestamp) as i64,
        }
    }
}

/// Bin of a non-negative delta: 0 holds zero, bin `k` holds `[2^(k-1), 2^k)`.
#[inline]
#[must_use]
pub fn log2_bin(delta: u64) -> usize {
    let bin = (u64::BITS - delta.leading_zeros()) as usize;
    bin.min(PROFILE_BINS - 1)
}

/// Histograms of inter-hit spacing.
///
/// A burst is a run of hits arriving on consecutive (or identical)
/// reference ticks.
#[derive(Debug, Clone, Default)]
pub struct BurstProfile {
    timestamp_deltas: [u64; PROFILE_BINS],
    arrival_deltas: [u64; PROFILE_BINS],
    burst_lengths: [u64; PROFILE_BINS],
    last: Option<(u64, u64)>,
    current_burst: u64,
}

impl BurstProfile {
    /// Creates an empty profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one emitted hit.
    pub fn record(&mut self, timestamp: u64, arrival: u64) {
        if let Some((last_timestamp, last_arrival)) = self.last {
            let arrival_delta = arrival.saturating_sub(last_arrival);
            self.timestamp_deltas[log2_bin(timestamp.abs_diff(last_timestamp))] += 1;
            self.arrival_deltas[log2_bin(arrival_delta)] += 1;
            if arrival_delta <= 1 {
                self.current_burst += 1;
            } else {
                self.close_burst();
                self.current_burst = 1;
            }
        } else {
            self.current_burst = 1;
        }
        self.last = Some((timestamp, arrival));
    }

    /// Books the burst in progress.
    pub fn finish(&mut self) {
        self.close_burst();
        self.current_burst = 0;
        self.last = None;
    }

    fn close_burst(&mut self) {
        if self.current_burst > 0 {
            self.burst_lengths[log2_bin(self.current_burst)] += 1;
        }
    }

    /// Histogram of timestamp differences between consecutive hits.
    #[must_use]
    pub fn timestamp_deltas(&self) -> &[u64; PROFILE_BINS] {
        &self.timestamp_deltas
    }

    /// Histogram of arrival differences between consecutive hits.
    #[must_use]
    pub fn arrival_deltas(&self) -> &[u64; PROFILE_BINS] {
        &self.arrival_deltas
    }

    /// Histogram of completed burst lengths.
    #[must_use]
    pub fn burst_lengths(&self) -> &[u64; PROFILE_BINS] {
        &self.burst_lengths
    }

    /// Clears all histograms.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Both side-channels.
#[derive(Debug, Clone)]
pub struct DebugChannels {
    /// Arrival-vs-reference delta stream.
    pub arrival: DebugTap<ArrivalDelta>,
    /// Inter-hit burst profile.
    pub bursts: BurstProfile,
}

impl DebugChannels {
    /// Creates both channels; `capacity` bounds the arrival stream.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            arrival: DebugTap::new(capacity),
            bursts: BurstProfile::new(),
        }
    }

    /// Records an emitted hit on both channels.
    pub fn record(&mut self, hit: &ConvertedHit) {
        self.arrival.push(ArrivalDelta::from_hit(hit));
        self.bursts.record(hit.hit.timestamp, hit.tag.arrival_reference);
    }

    /// Clears both channels.
    pub fn clear(&mut self) {
        self.arrival.clear();
        self.bursts.clear();
    }
}

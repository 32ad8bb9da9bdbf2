//! Epoch tracking for the wrapping local counter.
//!
//! # Problem
//! Hit timestamps come from a 15-bit counter inside the sensor that wraps
//! every [`WRAP_PERIOD`] local ticks. To place a hit on the non-wrapping
//! reference axis we add `wraps x WRAP_PERIOD`, where `wraps` counts the
//! periods elapsed since the last sync.
//!
//! Hits are buffered upstream before they reach us. Right after a wrap, a
//! hit may still carry a timestamp taken *before* it; adding the new epoch
//! would push that hit one full period into the future.
//!
//! # Solution
//! A mirror of the sensor counter runs alongside the reference clock
//! ([`DIVISION_RATIO`] local ticks per reference tick). When the mirror
//! wraps, two countdowns are armed:
//! 1. `pipeline_valid_countdown` (the pipeline latency): the new epoch
//!    settles through the pipeline registers and is only applied to hits
//!    once it reaches zero.
//! 2. `lookback_window` (the expected upstream latency): while it runs,
//!    hits whose decoded time lies in the upper tail of the period
//!    (above [`EpochTracker::upper`]) are assumed to predate the wrap and
//!    are pulled back by one period.
//!
//! The correction applied to hits is the *published* wrap count, which
//! trails `local_wrap_count` by the settle countdown. A hit taken after the
//! wrap that reaches the rebase stage inside that countdown is therefore
//! placed one period early and tagged by the soundness check downstream.
//! Upstream delays of at least the pipeline latency never produce such hits.

use crate::convert::PIPELINE_LATENCY;
use hitrebase_core::{DIVISION_RATIO, OVERFLOW_LOCAL, REFERENCE_CLOCK_MASK, WRAP_PERIOD};
use log::trace;

/// Snapshot of the tracker registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochState {
    /// Wraps of the mirrored counter since the last sync.
    pub local_wrap_count: u64,
    /// Wraps currently applied to rebased hits.
    pub published_wrap_count: u64,
    /// Reference ticks since the last sync (48 bits).
    pub reference_clock: u64,
    /// Mirrored local counter.
    pub mirror: u16,
    /// Remaining ticks in which upper-tail hits are pulled back.
    pub lookback_window: u32,
    /// Remaining ticks before the latest wrap is applied.
    pub pipeline_valid_countdown: u8,
}

/// Free-running reference clock plus wrap counter of the sensor's local counter.
#[derive(Debug, Clone)]
pub struct EpochTracker {
    state: EpochState,
    expected_latency_ticks: u32,
    upper: u16,
}

impl EpochTracker {
    /// Creates a tracker in its reset state.
    #[must_use]
    pub fn new(expected_latency_ticks: u32) -> Self {
        Self {
            state: EpochState::default(),
            expected_latency_ticks,
            upper: Self::upper_for(expected_latency_ticks),
        }
    }

    fn upper_for(expected_latency_ticks: u32) -> u16 {
        let tail = u64::from(expected_latency_ticks) * DIVISION_RATIO;
        u64::from(OVERFLOW_LOCAL).saturating_sub(tail) as u16
    }

    /// Changes the lookback window armed on future wraps.
    pub fn set_expected_latency(&mut self, expected_latency_ticks: u32) {
        self.expected_latency_ticks = expected_latency_ticks;
        self.upper = Self::upper_for(expected_latency_ticks);
    }

    /// Clears all counters (sync sub-phase).
    pub fn reset(&mut self) {
        self.state = EpochState::default();
    }

    /// Advances one reference tick. Returns true if the mirror wrapped.
    pub fn tick(&mut self) -> bool {
        let state = &mut self.state;
        state.reference_clock = (state.reference_clock + 1) & REFERENCE_CLOCK_MASK;

        let next = u64::from(state.mirror) + DIVISION_RATIO;
        if next > u64::from(OVERFLOW_LOCAL) {
            state.mirror = (next - WRAP_PERIOD) as u16;
            state.local_wrap_count += 1;
            state.lookback_window = self.expected_latency_ticks;
            state.pipeline_valid_countdown = PIPELINE_LATENCY as u8;
            if state.pipeline_valid_countdown == 0 {
                state.published_wrap_count = state.local_wrap_count;
            }
            trace!(
                "local counter wrap {} at reference tick {}",
                state.local_wrap_count,
                state.reference_clock
            );
            return true;
        }

        state.mirror = next as u16;
        state.lookback_window = state.lookback_window.saturating_sub(1);
        if state.pipeline_valid_countdown > 0 {
            state.pipeline_valid_countdown -= 1;
            if state.pipeline_valid_countdown == 0 {
                state.published_wrap_count = state.local_wrap_count;
            }
        }
        false
    }

    /// Offset added to decoded local times.
    #[inline]
    #[must_use]
    pub fn correction(&self) -> u64 {
        self.state.published_wrap_count * WRAP_PERIOD
    }

    /// Returns true if a hit with this decoded time predates the latest wrap.
    #[inline]
    #[must_use]
    pub fn predates_wrap(&self, decoded: u16) -> bool {
        self.state.lookback_window > 0
            && self.state.pipeline_valid_countdown == 0
            && decoded > self.upper
    }

    /// Places a decoded local time on the reference axis.
    ///
    /// Returns the rebased time and whether one period was pulled back.
    #[must_use]
    pub fn rebase(&self, decoded: u16) -> (u64, bool) {
        let time = u64::from(decoded) + self.correction();
        if self.predates_wrap(decoded) && time >= WRAP_PERIOD {
            (time - WRAP_PERIOD, true)
        } else {
            (time, false)
        }
    }

    /// Lower bound of the upper tail.
    #[inline]
    #[must_use]
    pub fn upper(&self) -> u16 {
        self.upper
    }

    /// Reference clock value.
    #[inline]
    #[must_use]
    pub fn reference_clock(&self) -> u64 {
        self.state.reference_clock
    }

    /// Wraps of the mirrored counter since the last sync.
    #[inline]
    #[must_use]
    pub fn local_wrap_count(&self) -> u64 {
        self.state.local_wrap_count
    }

    /// Current sensor time on the reference axis, in local ticks.
    #[must_use]
    pub fn sensor_time(&self) -> u64 {
        self.state.local_wrap_count * WRAP_PERIOD + u64::from(self.state.mirror)
    }

    /// Register snapshot.
    #[must_use]
    pub fn state(&self) -> EpochState {
        self.state
    }
}

//! Rebase-and-convert pipeline.
//!
//! A fixed-depth pipeline that accepts one hit per tick and never stalls:
//!
//! | stage | ticks | work                                              |
//! |-------|-------|---------------------------------------------------|
//! | 1     | 1     | symbol decode (both table ports)                  |
//! | 2     | 1     | rebase onto the reference axis                    |
//! | 3..5  | 3     | divide by [`DIVISION_RATIO`] (pipelined divider)  |
//!
//! The energy-minus-time difference skips the divider and travels through
//! a delay line of the same depth so that it lands on the divider's
//! output cycle.

use crate::decoder::SymbolDecoder;
use crate::epoch::EpochTracker;
use hitrebase_core::{
    DecodedHit, EnergyDelta, ProcessedHit, RawHit, RebasedHit, DIVISION_RATIO, WRAP_PERIOD,
};
use std::collections::VecDeque;

/// Ticks spent in the decode stage.
pub const DECODE_LATENCY: usize = 1;
/// Ticks spent in the rebase stage.
pub const REBASE_LATENCY: usize = 1;
/// Ticks spent in the pipelined divider.
pub const DIVIDER_LATENCY: usize = 3;
/// Ticks from admission to emission.
pub const PIPELINE_LATENCY: usize = DECODE_LATENCY + REBASE_LATENCY + DIVIDER_LATENCY;

/// A fixed-depth shift register.
#[derive(Debug, Clone)]
pub struct DelayLine<T> {
    slots: VecDeque<Option<T>>,
}

impl<T> DelayLine<T> {
    /// Creates an empty line of `depth` slots.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let mut slots = VecDeque::with_capacity(depth + 1);
        slots.extend((0..depth).map(|_| None));
        Self { slots }
    }

    /// Shifts `input` in and returns the value shifted in `depth` ticks ago.
    pub fn shift(&mut self, input: Option<T>) -> Option<T> {
        if self.slots.is_empty() {
            return input;
        }
        self.slots.push_back(input);
        self.slots.pop_front().flatten()
    }

    /// Number of slots.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Empties every slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Splits a rebased time into (reference ticks, sub-tick phase).
#[inline]
#[must_use]
pub fn divide(rebased: u64) -> (u64, u8) {
    (rebased / DIVISION_RATIO, (rebased % DIVISION_RATIO) as u8)
}

/// How a hit is rebased, latched at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebaseOptions {
    /// Use the undecoded symbol as local time.
    pub bypass: bool,
    /// Energy measurements are meaningful in the current readout mode.
    pub energy: bool,
}

/// Per-hit bookkeeping that travels alongside the datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HitTag {
    /// Link the hit arrived on.
    pub link: u8,
    /// First hit of the link in this run.
    pub start_of_stream: bool,
    /// Upstream error flags.
    pub error: bool,
    /// Reference clock at admission.
    pub arrival_reference: u64,
    /// Tick of admission.
    pub admitted_at: u64,
    /// Rebase options latched at admission.
    pub options: RebaseOptions,
    /// Run the hit was admitted into; `None` outside an emitting state.
    pub run: Option<u64>,
}

/// A hit entering the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The hit as received.
    pub hit: RawHit,
    /// Bookkeeping.
    pub tag: HitTag,
}

/// A hit leaving the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertedHit {
    /// Converted hit.
    pub hit: ProcessedHit,
    /// Bookkeeping.
    pub tag: HitTag,
    /// One period was pulled back during rebase.
    pub wrap_corrected: bool,
}

/// Rebases both time fields of a decoded hit.
///
/// Energy time never precedes the primary time; a smaller decoded energy
/// value means the energy counter crossed the wrap boundary.
#[must_use]
pub fn rebase(hit: &DecodedHit, tracker: &EpochTracker, bypass: bool) -> RebasedHit {
    if bypass {
        return RebasedHit {
            raw: hit.raw,
            time: u64::from(hit.raw.local_time),
            energy_time: u64::from(hit.raw.local_energy_time),
            wrap_corrected: false,
        };
    }

    let (time, wrap_corrected) = tracker.rebase(hit.time);
    let mut energy_time = time - u64::from(hit.time) + u64::from(hit.energy_time);
    if hit.energy_time < hit.time {
        energy_time += WRAP_PERIOD;
    }
    RebasedHit {
        raw: hit.raw,
        time,
        energy_time,
        wrap_corrected,
    }
}

/// Energy-minus-time field of a rebased hit.
#[must_use]
pub fn energy_delta(hit: &RebasedHit, energy_enabled: bool) -> EnergyDelta {
    if energy_enabled && hit.raw.energy_valid {
        EnergyDelta::from_difference(hit.energy_time.wrapping_sub(hit.time))
    } else {
        EnergyDelta::Invalid
    }
}

/// The decode, rebase and divide stages with their pipeline registers.
#[derive(Debug, Clone)]
pub struct ConvertPipeline {
    decode_reg: Option<(DecodedHit, HitTag)>,
    rebase_reg: Option<(RebasedHit, HitTag)>,
    divider: DelayLine<(u64, u8)>,
    energy: DelayLine<EnergyDelta>,
    sideband: DelayLine<(RebasedHit, HitTag)>,
}

impl Default for ConvertPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvertPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decode_reg: None,
            rebase_reg: None,
            divider: DelayLine::new(DIVIDER_LATENCY),
            energy: DelayLine::new(DIVIDER_LATENCY),
            sideband: DelayLine::new(DIVIDER_LATENCY),
        }
    }

    /// Advances every stage by one tick.
    ///
    /// `tracker` is read as it stands at the start of the tick; the caller
    /// advances it afterwards.
    pub fn step(
        &mut self,
        input: Option<Admission>,
        decoder: &SymbolDecoder,
        tracker: &EpochTracker,
    ) -> Option<ConvertedHit> {
        // Divider stages
        let entering = self.rebase_reg.take();
        let quotient = self.divider.shift(entering.map(|(hit, _)| divide(hit.time)));
        let energy = self
            .energy
            .shift(entering.map(|(hit, tag)| energy_delta(&hit, tag.options.energy)));
        let sideband = self.sideband.shift(entering);

        // Rebase stage
        self.rebase_reg = self
            .decode_reg
            .take()
            .map(|(hit, tag)| (rebase(&hit, tracker, tag.options.bypass), tag));

        // Decode stage
        self.decode_reg = input.map(|admission| (decoder.decode_hit(admission.hit), admission.tag));

        let ((timestamp, sub_coarse_time), energy, (rebased, tag)) =
            match (quotient, energy, sideband) {
                (Some(q), Some(e), Some(s)) => (q, e, s),
                _ => return None,
            };
        Some(ConvertedHit {
            hit: ProcessedHit {
                asic: rebased.raw.asic,
                channel: rebased.raw.channel,
                timestamp,
                sub_coarse_time,
                fine_time: rebased.raw.fine_time,
                energy,
                error: tag.error,
            },
            tag,
            wrap_corrected: rebased.wrap_corrected,
        })
    }

    /// Number of hits between admission and emission.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        usize::from(self.decode_reg.is_some())
            + usize::from(self.rebase_reg.is_some())
            + self.sideband.in_flight()
    }

    /// Drops every hit in flight.
    pub fn clear(&mut self) {
        self.decode_reg = None;
        self.rebase_reg = None;
        self.divider.clear();
        self.energy.clear();
        self.sideband.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{GrayCode, SymbolCode};
    use proptest::prelude::*;

    fn admission(local_time: u16, energy_time: Option<u16>) -> Admission {
        let mut hit = RawHit::new(3, 7, GrayCode.encode(local_time), 5);
        if let Some(energy) = energy_time {
            hit = hit.with_energy_time(GrayCode.encode(energy));
        }
        Admission {
            hit,
            tag: HitTag {
                options: RebaseOptions {
                    bypass: false,
                    energy: true,
                },
                ..HitTag::default()
            },
        }
    }

    #[test]
    fn test_delay_line() {
        let mut line = DelayLine::new(2);
        assert_eq!(line.shift(Some(1)), None);
        assert_eq!(line.shift(Some(2)), None);
        assert_eq!(line.in_flight(), 2);
        assert_eq!(line.shift(None), Some(1));
        assert_eq!(line.shift(None), Some(2));
        assert_eq!(line.shift(None), None);

        let mut passthrough = DelayLine::new(0);
        assert_eq!(passthrough.shift(Some(7)), Some(7));
    }

    #[test]
    fn test_fixed_latency() {
        let decoder = SymbolDecoder::new();
        let tracker = EpochTracker::new(2000);
        let mut pipeline = ConvertPipeline::new();

        assert!(pipeline.step(Some(admission(100, None)), &decoder, &tracker).is_none());
        for _ in 1..PIPELINE_LATENCY {
            assert!(pipeline.step(None, &decoder, &tracker).is_none());
        }
        assert_eq!(pipeline.in_flight(), 1);
        let out = pipeline.step(None, &decoder, &tracker).expect("hit after fixed latency");
        assert_eq!(out.hit.timestamp, 20);
        assert_eq!(out.hit.sub_coarse_time, 0);
        assert_eq!(out.hit.energy, EnergyDelta::Invalid);
        assert_eq!(pipeline.in_flight(), 0);
    }

    #[test]
    fn test_back_to_back_hits_keep_order() {
        let decoder = SymbolDecoder::new();
        let tracker = EpochTracker::new(2000);
        let mut pipeline = ConvertPipeline::new();

        let mut out = Vec::new();
        for t in 0..20u16 {
            let input = (t < 10).then(|| admission(1000 + t, Some(1010 + t)));
            out.extend(pipeline.step(input, &decoder, &tracker));
        }
        assert_eq!(out.len(), 10);
        for (i, hit) in out.iter().enumerate() {
            let rebased = 1000 + i as u64;
            assert_eq!(hit.hit.timestamp, rebased / 5);
            assert_eq!(u64::from(hit.hit.sub_coarse_time), rebased % 5);
            assert_eq!(hit.hit.energy, EnergyDelta::Valid(10));
        }
    }

    #[test]
    fn test_energy_crossing_wrap() {
        let decoder = SymbolDecoder::new();
        let tracker = EpochTracker::new(2000);
        let decoded = decoder.decode_hit(admission(32_765, Some(3)).hit);
        let rebased = rebase(&decoded, &tracker, false);
        assert_eq!(rebased.time, 32_765);
        assert_eq!(rebased.energy_time, WRAP_PERIOD + 3);
        assert_eq!(energy_delta(&rebased, true), EnergyDelta::Valid(6));
        assert_eq!(energy_delta(&rebased, false), EnergyDelta::Invalid);
    }

    #[test]
    fn test_bypass_uses_symbols() {
        let decoder = SymbolDecoder::new();
        let tracker = EpochTracker::new(2000);
        let hit = admission(1000, None).hit;
        let rebased = rebase(&decoder.decode_hit(hit), &tracker, true);
        assert_eq!(rebased.time, u64::from(GrayCode.encode(1000)));
        assert!(!rebased.wrap_corrected);
    }

    #[test]
    fn test_clear_drops_in_flight() {
        let decoder = SymbolDecoder::new();
        let tracker = EpochTracker::new(2000);
        let mut pipeline = ConvertPipeline::new();
        pipeline.step(Some(admission(1, None)), &decoder, &tracker);
        pipeline.step(Some(admission(2, None)), &decoder, &tracker);
        pipeline.step(Some(admission(3, None)), &decoder, &tracker);
        assert_eq!(pipeline.in_flight(), 3);
        pipeline.clear();
        assert_eq!(pipeline.in_flight(), 0);
        for _ in 0..PIPELINE_LATENCY {
            assert!(pipeline.step(None, &decoder, &tracker).is_none());
        }
    }

    proptest! {
        #[test]
        fn prop_division_is_exact(rebased in 0u64..(1 << 48)) {
            let (quotient, remainder) = divide(rebased);
            prop_assert!(remainder <= 4);
            prop_assert_eq!(quotient * DIVISION_RATIO + u64::from(remainder), rebased);
        }

        #[test]
        fn prop_energy_field_marks_validity(difference in any::<u64>(), upper in 0u16..0x80) {
            let bits = EnergyDelta::from_difference(difference).to_bits();
            prop_assert!(bits < EnergyDelta::INVALID_BIT);
            prop_assert_eq!(u64::from(bits), difference & 0xFF);
            // Only the marker bit decides validity once packed.
            prop_assert!(!EnergyDelta::from_bits(EnergyDelta::INVALID_BIT | (upper << 9) | bits).is_valid());
            prop_assert!(EnergyDelta::from_bits(bits).is_valid());
        }
    }
}

//! Output assembly: stream markers and soundness tagging.
//!
//! Start markers ride on the first hit of every link in a run. End markers
//! are separate words: once the run is flushing, a link's upstream end
//! marker becomes eligible after the hits admitted before it have left the
//! pipeline, and eligible markers are granted round-robin on cycles that
//! carry no hit.

use crate::arbiter::LINK_COUNT;
use crate::convert::{ConvertedHit, PIPELINE_LATENCY};
use hitrebase_core::{OutputWord, REFERENCE_CLOCK_MASK};
use log::{debug, warn};

/// Returns true if `timestamp` lies strictly inside the expected delay
/// window behind `reference`.
#[inline]
#[must_use]
pub fn is_sound(reference: u64, timestamp: u64, expected_latency_ticks: u32) -> bool {
    let diff = reference.wrapping_sub(timestamp) & REFERENCE_CLOCK_MASK;
    diff > 0 && diff < u64::from(expected_latency_ticks)
}

/// Per-run marker bookkeeping.
#[derive(Debug, Clone)]
pub struct OutputAssembler {
    enabled_links: u16,
    expected_latency_ticks: u32,
    flush_timeout_ticks: u32,
    started: u16,
    ended: u16,
    pending_end: [Option<u64>; LINK_COUNT],
    last_served: usize,
    flush_started_at: Option<u64>,
}

impl OutputAssembler {
    /// Creates an assembler with no run in progress.
    #[must_use]
    pub fn new(enabled_links: u16, expected_latency_ticks: u32, flush_timeout_ticks: u32) -> Self {
        Self {
            enabled_links,
            expected_latency_ticks,
            flush_timeout_ticks,
            started: 0,
            ended: 0,
            pending_end: [None; LINK_COUNT],
            last_served: LINK_COUNT - 1,
            flush_started_at: None,
        }
    }

    /// Applies new register values.
    pub fn configure(&mut self, enabled_links: u16, expected_latency_ticks: u32, flush_timeout_ticks: u32) {
        self.enabled_links = enabled_links;
        self.expected_latency_ticks = expected_latency_ticks;
        self.flush_timeout_ticks = flush_timeout_ticks;
    }

    /// Forgets all markers of the previous run.
    pub fn begin_run(&mut self) {
        self.started = 0;
        self.ended = 0;
        self.pending_end = [None; LINK_COUNT];
        self.last_served = LINK_COUNT - 1;
        self.flush_started_at = None;
    }

    /// Starts the grace period for end markers.
    pub fn begin_flush(&mut self, tick: u64) {
        debug!("flush started at tick {tick}");
        self.flush_started_at = Some(tick);
    }

    /// Leaves the flushing phase.
    pub fn end_flush(&mut self) {
        self.flush_started_at = None;
    }

    /// Returns true while flushing.
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.flush_started_at.is_some()
    }

    /// Claims the start marker of `link`. Returns true once per link per run.
    pub fn claim_start(&mut self, link: u8) -> bool {
        let bit = 1u16 << (link & 0xF);
        let first = self.started & bit == 0;
        self.started |= bit;
        first
    }

    /// Registers an upstream end marker admitted at `tick`.
    ///
    /// The marker becomes eligible once every hit admitted before it has
    /// been emitted.
    pub fn note_end_of_stream(&mut self, link: u8, tick: u64) {
        let index = usize::from(link & 0xF);
        let bit = 1u16 << index;
        if self.ended & bit != 0 || self.pending_end[index].is_some() {
            return;
        }
        self.pending_end[index] = Some(tick + PIPELINE_LATENCY as u64);
    }

    /// Wraps a converted hit into an output word with its soundness flag.
    #[must_use]
    pub fn emit(&self, hit: &ConvertedHit, reference: u64) -> OutputWord {
        let mut word = OutputWord::with_hit(hit.tag.link, hit.hit);
        word.start_of_stream = hit.tag.start_of_stream;
        word.soundness_error = !is_sound(reference, hit.hit.timestamp, self.expected_latency_ticks);
        word
    }

    /// Closes every open link once the grace period has elapsed.
    ///
    /// Returns the number of links closed this way.
    pub fn check_timeout(&mut self, tick: u64) -> u32 {
        let Some(started_at) = self.flush_started_at else {
            return 0;
        };
        let open = self.enabled_links & !self.ended;
        if open == 0 || tick.saturating_sub(started_at) < u64::from(self.flush_timeout_ticks) {
            return 0;
        }
        warn!(
            "flush timed out after {} ticks; closing links {open:#06x}",
            self.flush_timeout_ticks
        );
        self.ended |= open;
        for (index, pending) in self.pending_end.iter_mut().enumerate() {
            if open & (1 << index) != 0 {
                *pending = None;
            }
        }
        open.count_ones()
    }

    /// Content of a cycle without hit output while flushing.
    ///
    /// Grants one eligible end marker, or end-of-run padding once every
    /// enabled link is closed.
    pub fn idle_cycle(&mut self, tick: u64) -> OutputWord {
        if self.flush_complete() {
            return OutputWord::padding();
        }
        let granted = (1..=LINK_COUNT)
            .map(|offset| (self.last_served + offset) % LINK_COUNT)
            .find(|&link| self.pending_end[link].is_some_and(|eligible| eligible <= tick));
        let Some(link) = granted else {
            return OutputWord::idle();
        };
        self.pending_end[link] = None;
        self.ended |= 1 << link;
        self.last_served = link;
        OutputWord::end_marker(link as u8)
    }

    /// Returns true once every enabled link has been closed during a flush.
    #[must_use]
    pub fn flush_complete(&self) -> bool {
        self.is_flushing() && self.enabled_links & !self.ended == 0
    }

    /// Links that have been closed in this run.
    #[must_use]
    pub fn ended_links(&self) -> u16 {
        self.ended
    }

    /// Links that have emitted their start marker in this run.
    #[must_use]
    pub fn started_links(&self) -> u16 {
        self.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::HitTag;
    use hitrebase_core::{EnergyDelta, ProcessedHit};

    fn converted(link: u8, timestamp: u64) -> ConvertedHit {
        ConvertedHit {
            hit: ProcessedHit {
                asic: 0,
                channel: 0,
                timestamp,
                sub_coarse_time: 0,
                fine_time: 0,
                energy: EnergyDelta::Invalid,
                error: false,
            },
            tag: HitTag {
                link,
                ..HitTag::default()
            },
            wrap_corrected: false,
        }
    }

    #[test]
    fn test_soundness_boundary() {
        assert!(!is_sound(10_000, 10_000, 2000));
        assert!(is_sound(10_000, 10_000 - 1999, 2000));
        assert!(!is_sound(10_000, 10_000 - 2000, 2000));
        // Timestamps ahead of the reference are never sound.
        assert!(!is_sound(10_000, 10_001, 2000));
    }

    #[test]
    fn test_emit_tags_soundness() {
        let assembler = OutputAssembler::new(0xF, 2000, 100);
        assert!(!assembler.emit(&converted(1, 95), 100).soundness_error);
        assert!(assembler.emit(&converted(1, 100), 100).soundness_error);
    }

    #[test]
    fn test_start_marker_once_per_run() {
        let mut assembler = OutputAssembler::new(0xF, 2000, 100);
        assert!(assembler.claim_start(2));
        assert!(!assembler.claim_start(2));
        assert!(assembler.claim_start(3));
        assembler.begin_run();
        assert!(assembler.claim_start(2));
    }

    #[test]
    fn test_end_markers_round_robin_after_drain() {
        let mut assembler = OutputAssembler::new(0b1011, 2000, 1000);
        assembler.begin_run();
        assembler.begin_flush(10);
        assembler.note_end_of_stream(3, 10);
        assembler.note_end_of_stream(0, 10);
        assembler.note_end_of_stream(1, 11);

        // Not eligible until earlier hits have drained.
        assert!(assembler.idle_cycle(14).is_idle());
        assert_eq!(assembler.idle_cycle(15), OutputWord::end_marker(0));
        // Link 1 is not eligible yet; link 3 is.
        assert_eq!(assembler.idle_cycle(15), OutputWord::end_marker(3));
        assert!(!assembler.flush_complete());
        assert_eq!(assembler.idle_cycle(16), OutputWord::end_marker(1));
        assert!(assembler.flush_complete());
        assert_eq!(assembler.idle_cycle(17), OutputWord::padding());
    }

    #[test]
    fn test_duplicate_end_marker_ignored() {
        let mut assembler = OutputAssembler::new(0b1, 2000, 1000);
        assembler.begin_flush(0);
        assembler.note_end_of_stream(0, 0);
        assert_eq!(assembler.idle_cycle(5), OutputWord::end_marker(0));
        assembler.note_end_of_stream(0, 6);
        assert_eq!(assembler.idle_cycle(20), OutputWord::padding());
    }

    #[test]
    fn test_flush_timeout_closes_open_links() {
        let mut assembler = OutputAssembler::new(0b111, 2000, 50);
        assembler.begin_flush(100);
        assembler.note_end_of_stream(1, 100);
        assert_eq!(assembler.idle_cycle(105), OutputWord::end_marker(1));

        assert_eq!(assembler.check_timeout(149), 0);
        assert_eq!(assembler.check_timeout(150), 2);
        assert!(assembler.flush_complete());
        assert_eq!(assembler.check_timeout(151), 0);
        assert_eq!(assembler.ended_links(), 0b111);
    }

    #[test]
    fn test_not_flushing_never_complete() {
        let mut assembler = OutputAssembler::new(0b1, 2000, 50);
        assert!(!assembler.flush_complete());
        assert_eq!(assembler.check_timeout(1_000), 0);
        assembler.begin_flush(0);
        assembler.end_flush();
        assert!(!assembler.flush_complete());
    }
}

//! Replay of recorded input streams through a [`Processor`].
//!
//! Records between two tick advances belong to the same tick: link records
//! are queued on their upstream FIFO and the control message is delivered
//! on the first tick of the following advance. Control messages beyond the
//! first are delivered on consecutive ticks.

use crate::{Error, Result};
use hitrebase_core::{ControlMessage, StreamRecord};
use hitrebase_engine::{Counters, LinkArbiter, Processor, RunState, TickInput, TickOutput};
use log::{debug, info};
use std::collections::VecDeque;

/// Default bound on ticks spent draining after the stream ends.
pub const DEFAULT_DRAIN_LIMIT: u64 = 1 << 20;

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Ticks executed, including the drain.
    pub ticks: u64,
    /// Records consumed.
    pub records: usize,
    /// Non-idle output words produced.
    pub words: u64,
    /// Words dropped because their link was disabled.
    pub dropped_by_arbiter: u64,
    /// Words still queued upstream when replay stopped.
    pub stranded: usize,
    /// Processor counters at the end.
    pub counters: Counters,
    /// Run state at the end.
    pub final_state: RunState,
}

/// Drives a processor and its link arbiter from stream records.
pub struct Replay {
    processor: Processor,
    arbiter: LinkArbiter,
    controls: VecDeque<ControlMessage>,
    drain_limit: u64,
    ticks: u64,
    words: u64,
}

impl Replay {
    /// Creates a replay around a configured processor.
    #[must_use]
    pub fn new(processor: Processor) -> Self {
        Self {
            processor,
            arbiter: LinkArbiter::new(),
            controls: VecDeque::new(),
            drain_limit: DEFAULT_DRAIN_LIMIT,
            ticks: 0,
            words: 0,
        }
    }

    /// Sets the bound on ticks spent draining after the stream ends.
    #[must_use]
    pub fn with_drain_limit(mut self, ticks: u64) -> Self {
        self.drain_limit = ticks;
        self
    }

    /// The processor being driven.
    #[must_use]
    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Consumes the replay and returns the processor.
    #[must_use]
    pub fn into_processor(self) -> Processor {
        self.processor
    }

    /// Feeds every record, then drains.
    ///
    /// `sink` receives every non-idle output word.
    ///
    /// # Errors
    /// Returns an error from `sink`, or [`Error::DrainLimit`] if the
    /// pipeline does not settle within the drain limit.
    pub fn run<F>(&mut self, records: &[StreamRecord], mut sink: F) -> Result<ReplaySummary>
    where
        F: FnMut(&TickOutput) -> Result<()>,
    {
        for record in records {
            match *record {
                StreamRecord::Advance(ticks) => {
                    for _ in 0..ticks {
                        self.step(&mut sink)?;
                    }
                }
                StreamRecord::Control(message) => self.controls.push_back(message),
                _ => {
                    if let Some(word) = record.to_input_word() {
                        let enabled = self.processor.config().enabled_links;
                        self.arbiter.push(word, enabled);
                    }
                }
            }
        }
        debug!("stream consumed after {} ticks; draining", self.ticks);
        self.drain(&mut sink)?;

        let summary = ReplaySummary {
            ticks: self.ticks,
            records: records.len(),
            words: self.words,
            dropped_by_arbiter: self.arbiter.dropped(),
            stranded: self.arbiter.pending(),
            counters: *self.processor.counters(),
            final_state: self.processor.state(),
        };
        info!(
            "replay finished: {} ticks, {} words, {} hits emitted, state {}",
            summary.ticks, summary.words, summary.counters.emitted, summary.final_state
        );
        Ok(summary)
    }

    fn busy(&self) -> bool {
        !self.controls.is_empty()
            || self.processor.in_flight() > 0
            || (!self.arbiter.is_empty() && self.processor.admission_enabled())
    }

    fn drain<F>(&mut self, sink: &mut F) -> Result<()>
    where
        F: FnMut(&TickOutput) -> Result<()>,
    {
        let mut spent = 0;
        while self.busy() {
            if spent == self.drain_limit {
                return Err(Error::DrainLimit(spent));
            }
            self.step(sink)?;
            spent += 1;
        }
        Ok(())
    }

    fn step<F>(&mut self, sink: &mut F) -> Result<()>
    where
        F: FnMut(&TickOutput) -> Result<()>,
    {
        let enabled = self.processor.config().enabled_links;
        let ready = self.processor.admission_enabled();
        let input = TickInput {
            word: self.arbiter.grant(enabled, ready),
            control: self.controls.pop_front(),
        };
        let output = self.processor.tick(input);
        self.ticks += 1;
        if !output.word.is_idle() {
            self.words += 1;
            sink(&output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hitrebase_core::{Command, FrameErrors, RawHit};
    use hitrebase_engine::{GrayCode, RunConfig, SymbolCode};

    fn hit(link: u8, local: u16) -> StreamRecord {
        StreamRecord::Hit {
            link,
            hit: RawHit::new(0, 1, GrayCode.encode(local), 2),
            errors: FrameErrors::default(),
        }
    }

    fn start_sequence() -> Vec<StreamRecord> {
        vec![
            StreamRecord::Control(Command::RunPrepare.into()),
            StreamRecord::Advance(1),
            StreamRecord::Control(Command::Sync.into()),
            StreamRecord::Advance(1),
            StreamRecord::Control(Command::StartRun.into()),
            StreamRecord::Advance(100),
        ]
    }

    #[test]
    fn test_replay_emits_every_hit() {
        let processor = Processor::new(RunConfig::default().with_enabled_links(0b1)).unwrap();
        let mut replay = Replay::new(processor);
        let mut records = start_sequence();
        for i in 0..10 {
            records.push(hit(0, 450 + i));
            records.push(StreamRecord::Advance(1));
        }

        let mut words = Vec::new();
        let summary = replay
            .run(&records, |out| {
                words.push(out.word);
                Ok(())
            })
            .unwrap();

        assert_eq!(summary.counters.emitted, 10);
        assert_eq!(summary.counters.soundness_errors, 0);
        assert_eq!(words.len(), 10);
        assert_eq!(words[0].hit.map(|h| h.timestamp), Some(90));
        assert!(words[0].start_of_stream);
        assert_eq!(summary.final_state, RunState::Running);
        assert_eq!(summary.stranded, 0);
    }

    #[test]
    fn test_hits_after_stream_end_are_drained() {
        let processor = Processor::new(RunConfig::default().with_enabled_links(0b11)).unwrap();
        let mut replay = Replay::new(processor);
        let mut records = start_sequence();
        // Queued in one tick; the arbiter spreads them over the links.
        for i in 0..4 {
            records.push(hit(0, 450 + i));
            records.push(hit(1, 450 + i));
        }

        let summary = replay.run(&records, |_| Ok(())).unwrap();
        assert_eq!(summary.counters.emitted, 8);
        assert_eq!(summary.stranded, 0);
        assert_eq!(replay.processor().in_flight(), 0);
    }

    #[test]
    fn test_words_for_idle_processor_are_stranded() {
        let processor = Processor::new(RunConfig::default()).unwrap();
        let mut replay = Replay::new(processor);
        let records = [hit(0, 1), StreamRecord::Advance(5)];
        let summary = replay.run(&records, |_| Ok(())).unwrap();
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.stranded, 1);
        assert_eq!(summary.final_state, RunState::Idle);
    }

    #[test]
    fn test_disabled_links_dropped() {
        let processor = Processor::new(RunConfig::default().with_enabled_links(0b1)).unwrap();
        let mut replay = Replay::new(processor);
        let mut records = start_sequence();
        records.push(hit(3, 450));
        records.push(StreamRecord::Advance(10));
        let summary = replay.run(&records, |_| Ok(())).unwrap();
        assert_eq!(summary.dropped_by_arbiter, 1);
        assert_eq!(summary.counters.emitted, 0);
    }

    #[test]
    fn test_sink_error_stops_replay() {
        let processor = Processor::new(RunConfig::default()).unwrap();
        let mut replay = Replay::new(processor);
        let mut records = start_sequence();
        records.push(hit(0, 450));
        records.push(StreamRecord::Advance(10));
        let err = replay
            .run(&records, |_| Err(Error::InvalidFormat("sink closed".into())))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}

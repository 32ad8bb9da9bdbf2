//! The tick-level processor.
//!
//! Every call to [`Processor::tick`] is one reference clock cycle. Within a
//! tick all stages read the state as it stood at the start of the tick;
//! run control and the epoch tracker are updated last.

use crate::assembler::OutputAssembler;
use crate::config::{HitMode, RunConfig};
use crate::convert::{Admission, ConvertPipeline, HitTag, RebaseOptions};
use crate::debug::DebugChannels;
use crate::decoder::SymbolDecoder;
use crate::epoch::EpochTracker;
use crate::registers::{RegisterFile, StatusView};
use crate::run_control::{RunControl, RunState};
use crate::Result;
use hitrebase_core::{ControlMessage, InputWord, OutputWord, REFERENCE_CLOCK_MASK};
use log::{debug, info};

/// What arrives on the input channels during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickInput {
    /// Word granted by the link arbiter.
    pub word: Option<InputWord>,
    /// Control message.
    pub control: Option<ControlMessage>,
}

impl TickInput {
    /// A tick with nothing on either channel.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// A tick carrying one input word.
    #[must_use]
    pub fn word(word: InputWord) -> Self {
        Self {
            word: Some(word),
            control: None,
        }
    }

    /// A tick carrying one control message.
    #[must_use]
    pub fn control(control: impl Into<ControlMessage>) -> Self {
        Self {
            word: None,
            control: Some(control.into()),
        }
    }
}

/// What leaves the processor during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutput {
    /// Output channel word.
    pub word: OutputWord,
    /// Input word was taken into the pipeline or consumed as a marker.
    pub admitted: bool,
    /// Run state the tick was evaluated in.
    pub state: RunState,
    /// Reference clock the tick was evaluated at.
    pub reference_clock: u64,
}

/// Read-only counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Valid hits presented while admission was enabled (48 bits).
    pub total_hits: u64,
    /// Hits dropped at admission.
    pub discarded_hits: u32,
    /// Hits emitted with the valid flag.
    pub emitted: u64,
    /// Hits that left the pipeline in a state without output.
    pub suppressed: u64,
    /// Emitted hits outside the expected delay window.
    pub soundness_errors: u64,
    /// End-of-stream markers emitted.
    pub end_markers: u64,
    /// Links closed by the flush timeout.
    pub timed_out_links: u64,
}

/// Decoder, epoch tracker, pipeline, run control and output assembly,
/// advanced together one tick at a time.
#[derive(Debug, Clone)]
pub struct Processor {
    config: RunConfig,
    registers: RegisterFile,
    decoder: SymbolDecoder,
    tracker: EpochTracker,
    pipeline: ConvertPipeline,
    run_control: RunControl,
    assembler: OutputAssembler,
    debug: DebugChannels,
    counters: Counters,
    run: u64,
    tick: u64,
}

impl Processor {
    /// Creates a processor with the default Gray-code decoder.
    ///
    /// # Errors
    /// Returns an error if the configuration fails validation.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registers: RegisterFile::new(),
            decoder: SymbolDecoder::new(),
            tracker: EpochTracker::new(config.expected_latency_ticks),
            pipeline: ConvertPipeline::new(),
            run_control: RunControl::new(),
            assembler: OutputAssembler::new(
                config.enabled_links,
                config.expected_latency_ticks,
                config.flush_timeout_ticks,
            ),
            debug: DebugChannels::new(config.debug_capacity),
            counters: Counters::default(),
            run: 0,
            tick: 0,
            config,
        })
    }

    /// Replaces the symbol decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: SymbolDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Applied configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run-control state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> RunState {
        self.run_control.state()
    }

    /// Run-control machine.
    #[must_use]
    pub fn run_control(&self) -> &RunControl {
        &self.run_control
    }

    /// Counters.
    #[must_use]
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Epoch tracker.
    #[must_use]
    pub fn tracker(&self) -> &EpochTracker {
        &self.tracker
    }

    /// Output assembler.
    #[must_use]
    pub fn assembler(&self) -> &OutputAssembler {
        &self.assembler
    }

    /// Debug side-channels.
    #[must_use]
    pub fn debug(&self) -> &DebugChannels {
        &self.debug
    }

    /// Debug side-channels, for draining.
    pub fn debug_mut(&mut self) -> &mut DebugChannels {
        &mut self.debug
    }

    /// Ticks elapsed since construction.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Hits between admission and emission.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pipeline.in_flight()
    }

    /// Stages a register write; it takes effect on the next tick.
    ///
    /// # Errors
    /// See [`RegisterFile::write`].
    pub fn write_register(&mut self, address: u32, value: u32) -> Result<()> {
        self.registers.write(address, value)
    }

    /// Reads a register.
    ///
    /// # Errors
    /// See [`RegisterFile::read`].
    pub fn read_register(&self, address: u32) -> Result<u32> {
        let status = StatusView {
            counters: &self.counters,
            state: self.state(),
            reference_clock: self.tracker.reference_clock(),
        };
        RegisterFile::read(address, &self.config, &status)
    }

    /// Returns true if an input word offered now would be taken.
    #[must_use]
    pub fn admission_enabled(&self) -> bool {
        !self.config.soft_reset
            && !self.config.force_stop
            && self.state().admits()
            && !self.assembler.flush_complete()
    }

    /// Advances one tick.
    pub fn tick(&mut self, input: TickInput) -> TickOutput {
        if self.registers.has_staged() {
            self.apply_registers();
        }

        if self.config.soft_reset {
            self.hold_in_reset();
            self.tick += 1;
            return TickOutput {
                word: OutputWord::idle(),
                admitted: false,
                state: RunState::Idle,
                reference_clock: 0,
            };
        }

        let state = self.state();
        let reference = self.tracker.reference_clock();

        // Admission
        let admission_enabled = self.admission_enabled();
        let (admission, admitted) = match input.word {
            Some(word) if admission_enabled => (self.admit(word, state, reference), true),
            _ => (None, false),
        };

        // Pipeline and emission
        let converted = self.pipeline.step(admission, &self.decoder, &self.tracker);
        if state == RunState::Flushing {
            self.counters.timed_out_links += u64::from(self.assembler.check_timeout(self.tick));
        }
        let word = match converted {
            Some(hit) if state.emits() && hit.tag.run == Some(self.run) => {
                let word = self.assembler.emit(&hit, reference);
                self.counters.emitted += 1;
                if word.soundness_error {
                    self.counters.soundness_errors += 1;
                }
                self.debug.record(&hit);
                word
            }
            // Left over from a clear phase or an earlier run.
            Some(_) => {
                self.counters.suppressed += 1;
                OutputWord::idle()
            }
            None if state == RunState::Flushing => {
                let word = self.assembler.idle_cycle(self.tick);
                if word.end_of_stream {
                    self.counters.end_markers += 1;
                }
                word
            }
            None => OutputWord::idle(),
        };

        // Run control
        if let Some(control) = input.control {
            self.run_control.deliver(control);
        }
        self.run_control.step(self.config.go);
        let next = self.run_control.state();
        if next != state {
            self.on_transition(state, next);
        }

        // Epoch tracker
        if next.holds_epoch_reset() {
            self.tracker.reset();
        } else {
            self.tracker.tick();
        }

        self.tick += 1;
        TickOutput {
            word,
            admitted,
            state,
            reference_clock: reference,
        }
    }

    fn admit(&mut self, word: InputWord, state: RunState, reference: u64) -> Option<Admission> {
        if word.end_of_stream && state.emits() {
            self.assembler.note_end_of_stream(word.link, self.tick);
        }
        if !word.has_hit() {
            return None;
        }

        self.counters.total_hits = (self.counters.total_hits + 1) & REFERENCE_CLOCK_MASK;
        let hit = word.hit;
        let mode = self.config.hit_mode;
        if mode == HitMode::Unknown || (self.config.discard_hit_err && hit.hit_error) {
            self.counters.discarded_hits = self.counters.discarded_hits.wrapping_add(1);
            return None;
        }

        let start_of_stream = state.emits() && self.assembler.claim_start(word.link);
        Some(Admission {
            hit,
            tag: HitTag {
                link: word.link,
                start_of_stream,
                error: hit.hit_error || word.errors.any(),
                arrival_reference: reference,
                admitted_at: self.tick,
                options: RebaseOptions {
                    bypass: self.config.bypass_rebase || mode == HitMode::Prbs,
                    energy: mode == HitMode::Long,
                },
                run: state.emits().then_some(self.run),
            },
        })
    }

    fn on_transition(&mut self, from: RunState, to: RunState) {
        if from == RunState::Flushing {
            self.assembler.end_flush();
            self.debug.bursts.finish();
        }
        match to {
            RunState::Running => {
                self.run += 1;
                self.assembler.begin_run();
            }
            RunState::Flushing => self.assembler.begin_flush(self.tick),
            _ => {}
        }
    }

    fn apply_registers(&mut self) {
        if !self.registers.apply(&mut self.config) {
            return;
        }
        self.tracker.set_expected_latency(self.config.expected_latency_ticks);
        self.assembler.configure(
            self.config.enabled_links,
            self.config.expected_latency_ticks,
            self.config.flush_timeout_ticks,
        );
        debug!("registers applied at tick {}", self.tick);
    }

    fn hold_in_reset(&mut self) {
        if self.state() != RunState::Idle || self.pipeline.in_flight() > 0 {
            info!("soft reset at tick {}", self.tick);
        }
        self.pipeline.clear();
        self.tracker.reset();
        self.run_control.reset();
        self.assembler.begin_run();
        self.counters = Counters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{GrayCode, SymbolCode};
    use hitrebase_core::{Command, RawHit};

    fn prepared() -> Processor {
        let mut processor = Processor::new(RunConfig::default()).unwrap();
        processor.tick(TickInput::control(Command::RunPrepare));
        processor.tick(TickInput::control(Command::Sync));
        processor.tick(TickInput::control(Command::StartRun));
        processor
    }

    #[test]
    fn test_reset_sequence_holds_clock() {
        let mut processor = Processor::new(RunConfig::default()).unwrap();
        processor.tick(TickInput::control(Command::RunPrepare));
        assert_eq!(processor.state(), RunState::Reset(crate::run_control::ResetPhase::Clear));
        assert_eq!(processor.tracker().reference_clock(), 1);

        processor.tick(TickInput::control(Command::Sync));
        assert_eq!(processor.tracker().reference_clock(), 0);
        processor.tick(TickInput::idle());
        assert_eq!(processor.tracker().reference_clock(), 0);

        processor.tick(TickInput::control(Command::StartRun));
        assert_eq!(processor.state(), RunState::Running);
        assert_eq!(processor.tracker().reference_clock(), 1);
    }

    #[test]
    fn test_hit_emitted_after_pipeline_latency() {
        let mut processor = prepared();
        for _ in 0..100 {
            processor.tick(TickInput::idle());
        }
        let reference = processor.tracker().reference_clock();
        assert_eq!(reference, 101);
        let local = GrayCode.encode(((reference - 1) * 5) as u16);
        let out = processor.tick(TickInput::word(InputWord::hit(2, RawHit::new(1, 2, local, 3))));
        assert!(out.admitted);
        assert!(!out.word.is_valid());

        let mut emitted = Vec::new();
        for _ in 0..crate::convert::PIPELINE_LATENCY {
            emitted.push(processor.tick(TickInput::idle()).word);
        }
        assert!(emitted[..4].iter().all(OutputWord::is_idle));
        let word = emitted[4];
        assert_eq!(word.link, 2);
        assert!(word.start_of_stream);
        assert!(!word.soundness_error);
        assert_eq!(word.hit.map(|h| h.timestamp), Some(reference - 1));
        assert_eq!(processor.counters().emitted, 1);
        assert_eq!(processor.debug().arrival.len(), 1);
    }

    #[test]
    fn test_soft_reset_holds_everything() {
        let mut processor = prepared();
        processor.tick(TickInput::word(InputWord::hit(0, RawHit::new(0, 0, 0, 0))));
        let control = RunConfig::default().with_go(true);
        let value = crate::registers::encode_control(&control) | 0b100;
        processor.write_register(crate::registers::CONTROL, value).unwrap();
        processor.tick(TickInput::idle());
        assert_eq!(processor.state(), RunState::Idle);
        assert_eq!(processor.in_flight(), 0);
        assert_eq!(processor.counters(), &Counters::default());
        assert_eq!(processor.tracker().reference_clock(), 0);
        assert!(!processor.admission_enabled());
    }
}

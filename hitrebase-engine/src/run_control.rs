//! Run-control state machine.
//!
//! One command is delivered per control message. The most recent command is
//! held and re-evaluated on every tick, so a `StartRun` issued while `go` is
//! deasserted takes effect as soon as `go` is raised.

use hitrebase_core::{Command, ControlMessage};
use log::{debug, info, warn};
use std::fmt;

/// Sub-phase of the run-preparation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetPhase {
    /// Stale upstream data is drained; output is suppressed.
    Clear,
    /// The epoch tracker is held in reset.
    Sync,
    /// Synchronised and waiting for `go`.
    Done,
}

/// Run-control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    /// No run in progress.
    #[default]
    Idle,
    /// Run preparation.
    Reset(ResetPhase),
    /// Data taking.
    Running,
    /// Draining until every enabled link has ended.
    Flushing,
    /// Link test pattern.
    LinkTest,
    /// Sync test pulses.
    SyncTest,
    /// Held in manual reset.
    ManualReset,
    /// Excluded from data acquisition.
    OutOfDaq,
    /// Unrecognised command received.
    Error,
}

impl RunState {
    /// Returns true if hits may enter the pipeline in this state.
    #[inline]
    #[must_use]
    pub fn admits(self) -> bool {
        matches!(
            self,
            RunState::Reset(ResetPhase::Clear) | RunState::Running | RunState::Flushing
        )
    }

    /// Returns true if converted hits are marked valid in this state.
    #[inline]
    #[must_use]
    pub fn emits(self) -> bool {
        matches!(self, RunState::Running | RunState::Flushing)
    }

    /// Returns true if the epoch tracker is held in reset.
    #[inline]
    #[must_use]
    pub fn holds_epoch_reset(self) -> bool {
        self == RunState::Reset(ResetPhase::Sync)
    }

    /// Value of the run-state status register.
    #[must_use]
    pub fn to_bits(self) -> u32 {
        match self {
            RunState::Idle => 0x0,
            RunState::Reset(ResetPhase::Clear) => 0x1,
            RunState::Reset(ResetPhase::Sync) => 0x2,
            RunState::Reset(ResetPhase::Done) => 0x3,
            RunState::Running => 0x4,
            RunState::Flushing => 0x5,
            RunState::LinkTest => 0x6,
            RunState::SyncTest => 0x7,
            RunState::ManualReset => 0x8,
            RunState::OutOfDaq => 0x9,
            RunState::Error => 0xF,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Reset(ResetPhase::Clear) => "reset.clear",
            RunState::Reset(ResetPhase::Sync) => "reset.sync",
            RunState::Reset(ResetPhase::Done) => "reset.done",
            RunState::Running => "running",
            RunState::Flushing => "flushing",
            RunState::LinkTest => "link_test",
            RunState::SyncTest => "sync_test",
            RunState::ManualReset => "manual_reset",
            RunState::OutOfDaq => "out_of_daq",
            RunState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Next state for a held command.
///
/// `AbortRun` and `Reset` apply from every state; everything else is
/// accepted only where listed and ignored elsewhere.
#[must_use]
pub fn next_state(state: RunState, command: Command, go: bool) -> RunState {
    use Command as C;
    use ResetPhase::{Clear, Done, Sync};
    use RunState as S;

    match (state, command) {
        (_, C::AbortRun) => S::Idle,
        (_, C::Reset) => S::ManualReset,
        (S::ManualReset, C::StopReset) => S::Idle,

        (S::Idle, C::RunPrepare) => S::Reset(Clear),
        (S::Idle | S::Reset(Clear | Done), C::StartRun) if go => S::Running,
        (S::Reset(Clear), C::Sync) => S::Reset(Sync),
        (S::Reset(Sync), C::StartRun) => {
            if go {
                S::Running
            } else {
                S::Reset(Done)
            }
        }
        (S::Running, C::EndRun) => S::Flushing,

        (S::Idle, C::StartLinkTest) => S::LinkTest,
        (S::LinkTest, C::StopLinkTest) => S::Idle,
        (S::Idle, C::StartSyncTest) => S::SyncTest,
        (S::SyncTest, C::StopSyncTest) => S::Idle,
        (S::Idle, C::Disable) => S::OutOfDaq,
        (S::OutOfDaq, C::Enable) => S::Idle,

        (other, _) => other,
    }
}

/// The run-control state machine with its held command.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    state: RunState,
    held: Option<Command>,
    address: Option<u16>,
    command_errors: u64,
}

impl RunControl {
    /// Creates a machine in `Idle` with no held command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Command re-evaluated on every tick.
    #[must_use]
    pub fn held(&self) -> Option<Command> {
        self.held
    }

    /// Board address from the last `Address` command.
    #[must_use]
    pub fn address(&self) -> Option<u16> {
        self.address
    }

    /// Number of unrecognised command codes received.
    #[must_use]
    pub fn command_errors(&self) -> u64 {
        self.command_errors
    }

    /// Delivers one control message.
    ///
    /// An unrecognised code moves the machine to `Error` and clears the
    /// held command.
    pub fn deliver(&mut self, message: ControlMessage) {
        match message.command() {
            Ok(Command::Address(address)) => {
                debug!("addressed board {address:#06x}");
                self.address = Some(address);
            }
            Ok(command) => {
                debug!("command {command} in state {}", self.state);
                self.held = Some(command);
            }
            Err(err) => {
                warn!("{err}; run control enters error state");
                self.command_errors += 1;
                self.held = None;
                self.transition(RunState::Error);
            }
        }
    }

    /// Evaluates the held command. Returns the previous state on a change.
    pub fn step(&mut self, go: bool) -> Option<RunState> {
        let command = self.held?;
        let next = next_state(self.state, command, go);
        if next == self.state {
            return None;
        }
        let previous = self.state;
        self.transition(next);
        Some(previous)
    }

    /// Returns to `Idle` and forgets the held command.
    pub fn reset(&mut self) {
        self.state = RunState::Idle;
        self.held = None;
        self.address = None;
    }

    fn transition(&mut self, next: RunState) {
        if next != self.state {
            info!("run state {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

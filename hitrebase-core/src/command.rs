//! Run-control command codes.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A decoded run-control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Command {
    /// Prepare a run: enter the reset sequence (0x10).
    RunPrepare,
    /// Synchronise counters (0x11).
    Sync,
    /// Start data taking (0x12).
    StartRun,
    /// Terminate the run and flush (0x13).
    EndRun,
    /// Abort to idle (0x14).
    AbortRun,
    /// Enter link test (0x20).
    StartLinkTest,
    /// Leave link test (0x21).
    StopLinkTest,
    /// Enter sync test (0x24).
    StartSyncTest,
    /// Leave sync test (0x25).
    StopSyncTest,
    /// Sync test pulse (0x26).
    TestSync,
    /// Enter manual reset (0x30).
    Reset,
    /// Leave manual reset (0x31).
    StopReset,
    /// Rejoin data acquisition (0x32).
    Enable,
    /// Leave data acquisition (0x33).
    Disable,
    /// Address a single board (0x40).
    Address(u16),
}

impl Command {
    /// All commands without payload, with their names.
    const NAMED: [(Command, &'static str); 14] = [
        (Command::RunPrepare, "run_prepare"),
        (Command::Sync, "sync"),
        (Command::StartRun, "start_run"),
        (Command::EndRun, "end_run"),
        (Command::AbortRun, "abort_run"),
        (Command::StartLinkTest, "start_link_test"),
        (Command::StopLinkTest, "stop_link_test"),
        (Command::StartSyncTest, "start_sync_test"),
        (Command::StopSyncTest, "stop_sync_test"),
        (Command::TestSync, "test_sync"),
        (Command::Reset, "reset"),
        (Command::StopReset, "stop_reset"),
        (Command::Enable, "enable"),
        (Command::Disable, "disable"),
    ];

    /// Wire code of the command.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Command::RunPrepare => 0x10,
            Command::Sync => 0x11,
            Command::StartRun => 0x12,
            Command::EndRun => 0x13,
            Command::AbortRun => 0x14,
            Command::StartLinkTest => 0x20,
            Command::StopLinkTest => 0x21,
            Command::StartSyncTest => 0x24,
            Command::StopSyncTest => 0x25,
            Command::TestSync => 0x26,
            Command::Reset => 0x30,
            Command::StopReset => 0x31,
            Command::Enable => 0x32,
            Command::Disable => 0x33,
            Command::Address(_) => 0x40,
        }
    }

    /// 16-bit payload carried alongside the code.
    #[must_use]
    pub const fn payload(self) -> u16 {
        match self {
            Command::Address(address) => address,
            _ => 0,
        }
    }

    /// Decodes a wire code and payload.
    ///
    /// # Errors
    /// Returns [`Error::UnknownCommand`] for codes outside the command set.
    pub fn decode(code: u8, payload: u16) -> Result<Self> {
        if code == 0x40 {
            return Ok(Command::Address(payload));
        }
        Self::NAMED
            .iter()
            .map(|(command, _)| *command)
            .find(|command| command.code() == code)
            .ok_or(Error::UnknownCommand(code))
    }

    /// Snake-case name of the command.
    #[must_use]
    pub fn name(self) -> &'static str {
        if let Command::Address(_) = self {
            return "address";
        }
        Self::NAMED
            .iter()
            .find(|(command, _)| *command == self)
            .map_or("address", |(_, name)| name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Address(address) => write!(f, "address:{address:#06x}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Parses `run_prepare`, `start_run`, ..., or `address:<n>` (decimal or `0x` hex).
impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(value) = s.strip_prefix("address:") {
            let parsed = match value.strip_prefix("0x") {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => value.parse::<u16>(),
            };
            return parsed
                .map(Command::Address)
                .map_err(|_| Error::UnknownCommandName(s.to_string()));
        }
        Self::NAMED
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(command, _)| *command)
            .ok_or_else(|| Error::UnknownCommandName(s.to_string()))
    }
}

/// A control-channel message as delivered, before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlMessage {
    /// Command code.
    pub code: u8,
    /// Payload (address for [`Command::Address`]).
    pub payload: u16,
}

impl ControlMessage {
    /// Creates a message from a raw code and payload.
    #[must_use]
    pub fn new(code: u8, payload: u16) -> Self {
        Self { code, payload }
    }

    /// Decodes the message.
    ///
    /// # Errors
    /// Returns [`Error::UnknownCommand`] for unrecognized codes.
    pub fn command(&self) -> Result<Command> {
        Command::decode(self.code, self.payload)
    }
}

impl From<Command> for ControlMessage {
    fn from(command: Command) -> Self {
        Self::new(command.code(), command.payload())
    }
}

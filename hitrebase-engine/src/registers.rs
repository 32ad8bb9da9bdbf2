//! 32-bit register interface.
//!
//! Writes are staged and land on the next tick boundary, so the datapath
//! never observes a configuration change in the middle of a tick. Counters
//! and the run state are read-only.

use crate::config::{HitMode, RunConfig};
use crate::processor::Counters;
use crate::run_control::RunState;
use crate::{Error, Result};
use log::debug;

/// Control bits and hit mode.
pub const CONTROL: u32 = 0x00;
/// Expected upstream latency in reference ticks.
pub const EXPECTED_LATENCY: u32 = 0x04;
/// Bit mask of enabled links.
pub const ENABLED_LINKS: u32 = 0x08;
/// Flush grace period in reference ticks.
pub const FLUSH_TIMEOUT: u32 = 0x0C;
/// Hits dropped at admission (read-only).
pub const DISCARDED_HITS: u32 = 0x10;
/// Low word of the 48-bit hit counter (read-only).
pub const TOTAL_HITS_LO: u32 = 0x14;
/// High word of the 48-bit hit counter (read-only).
pub const TOTAL_HITS_HI: u32 = 0x18;
/// Run-control state (read-only).
pub const RUN_STATE: u32 = 0x1C;
/// Low word of the reference clock (read-only).
pub const REFERENCE_CLOCK_LO: u32 = 0x20;
/// High word of the reference clock (read-only).
pub const REFERENCE_CLOCK_HI: u32 = 0x24;

const GO: u32 = 1 << 0;
const FORCE_STOP: u32 = 1 << 1;
const SOFT_RESET: u32 = 1 << 2;
const BYPASS_REBASE: u32 = 1 << 3;
const DISCARD_HIT_ERR: u32 = 1 << 4;
const HIT_MODE_SHIFT: u32 = 8;

/// Packs the control fields of `config`.
#[must_use]
pub fn encode_control(config: &RunConfig) -> u32 {
    let flag = |set: bool, bit: u32| if set { bit } else { 0 };
    flag(config.go, GO)
        | flag(config.force_stop, FORCE_STOP)
        | flag(config.soft_reset, SOFT_RESET)
        | flag(config.bypass_rebase, BYPASS_REBASE)
        | flag(config.discard_hit_err, DISCARD_HIT_ERR)
        | config.hit_mode.to_bits() << HIT_MODE_SHIFT
}

fn apply_control(config: &mut RunConfig, value: u32) {
    config.go = value & GO != 0;
    config.force_stop = value & FORCE_STOP != 0;
    config.soft_reset = value & SOFT_RESET != 0;
    config.bypass_rebase = value & BYPASS_REBASE != 0;
    config.discard_hit_err = value & DISCARD_HIT_ERR != 0;
    config.hit_mode = HitMode::from_bits(value >> HIT_MODE_SHIFT);
}

/// Read-only values exposed through the register map.
#[derive(Debug, Clone, Copy)]
pub struct StatusView<'a> {
    /// Counters.
    pub counters: &'a Counters,
    /// Run-control state.
    pub state: RunState,
    /// Reference clock.
    pub reference_clock: u64,
}

/// Staged register writes.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    staged: Vec<(u32, u32)>,
}

impl RegisterFile {
    /// Creates a register file with nothing staged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a write for the next tick boundary.
    ///
    /// # Errors
    /// Rejects unmapped and read-only addresses, and values the datapath
    /// cannot honour.
    pub fn write(&mut self, address: u32, value: u32) -> Result<()> {
        match address {
            CONTROL | FLUSH_TIMEOUT => {}
            EXPECTED_LATENCY => RunConfig::validate_latency(value)?,
            ENABLED_LINKS => {
                if value == 0 || value > u32::from(u16::MAX) {
                    return Err(Error::Config(format!("invalid link mask {value:#x}")));
                }
            }
            DISCARDED_HITS | TOTAL_HITS_LO | TOTAL_HITS_HI | RUN_STATE | REFERENCE_CLOCK_LO
            | REFERENCE_CLOCK_HI => return Err(Error::ReadOnlyRegister(address)),
            _ => return Err(Error::UnknownRegister(address)),
        }
        if address == FLUSH_TIMEOUT && value == 0 {
            return Err(Error::Config("flush timeout must be non-zero".into()));
        }
        self.staged.push((address, value));
        Ok(())
    }

    /// Returns true if writes are waiting for the next tick.
    #[must_use]
    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Applies staged writes in order. Returns true if anything changed.
    pub fn apply(&mut self, config: &mut RunConfig) -> bool {
        if self.staged.is_empty() {
            return false;
        }
        for (address, value) in self.staged.drain(..) {
            debug!("register {address:#06x} <- {value:#010x}");
            match address {
                CONTROL => apply_control(config, value),
                EXPECTED_LATENCY => config.expected_latency_ticks = value,
                ENABLED_LINKS => config.enabled_links = value as u16,
                FLUSH_TIMEOUT => config.flush_timeout_ticks = value,
                _ => {}
            }
        }
        true
    }

    /// Reads a register from the applied configuration and status.
    ///
    /// # Errors
    /// Returns [`Error::UnknownRegister`] for unmapped addresses.
    pub fn read(address: u32, config: &RunConfig, status: &StatusView<'_>) -> Result<u32> {
        let value = match address {
            CONTROL => encode_control(config),
            EXPECTED_LATENCY => config.expected_latency_ticks,
            ENABLED_LINKS => u32::from(config.enabled_links),
            FLUSH_TIMEOUT => config.flush_timeout_ticks,
            DISCARDED_HITS => status.counters.discarded_hits,
            TOTAL_HITS_LO => status.counters.total_hits as u32,
            TOTAL_HITS_HI => (status.counters.total_hits >> 32) as u32,
            RUN_STATE => status.state.to_bits(),
            REFERENCE_CLOCK_LO => status.reference_clock as u32,
            REFERENCE_CLOCK_HI => (status.reference_clock >> 32) as u32,
            _ => return Err(Error::UnknownRegister(address)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_round_trip() {
        let config = RunConfig::default()
            .with_go(false)
            .with_force_stop(true)
            .with_hit_mode(HitMode::Prbs)
            .with_discard_hit_err(false);
        let mut applied = RunConfig::default();
        apply_control(&mut applied, encode_control(&config));
        assert_eq!(applied, config);
    }

    #[test]
    fn test_writes_are_staged() {
        let mut registers = RegisterFile::new();
        let mut config = RunConfig::default();
        registers.write(EXPECTED_LATENCY, 500).unwrap();
        registers.write(ENABLED_LINKS, 0b11).unwrap();
        assert!(registers.has_staged());
        assert_eq!(config.expected_latency_ticks, 2000);

        assert!(registers.apply(&mut config));
        assert_eq!(config.expected_latency_ticks, 500);
        assert_eq!(config.enabled_links, 0b11);
        assert!(!registers.apply(&mut config));
    }

    #[test]
    fn test_rejected_writes() {
        let mut registers = RegisterFile::new();
        assert!(matches!(
            registers.write(TOTAL_HITS_LO, 1),
            Err(Error::ReadOnlyRegister(TOTAL_HITS_LO))
        ));
        assert!(matches!(registers.write(0x100, 1), Err(Error::UnknownRegister(0x100))));
        assert!(matches!(registers.write(EXPECTED_LATENCY, 3), Err(Error::Config(_))));
        assert!(matches!(registers.write(ENABLED_LINKS, 0), Err(Error::Config(_))));
        assert!(matches!(registers.write(FLUSH_TIMEOUT, 0), Err(Error::Config(_))));
        assert!(!registers.has_staged());
    }

    #[test]
    fn test_status_reads() {
        let counters = Counters {
            total_hits: 0x1234_5678_9ABC,
            discarded_hits: 7,
            ..Counters::default()
        };
        let status = StatusView {
            counters: &counters,
            state: RunState::Running,
            reference_clock: 0x0001_0000_0002,
        };
        let config = RunConfig::default();
        assert_eq!(RegisterFile::read(TOTAL_HITS_LO, &config, &status).unwrap(), 0x5678_9ABC);
        assert_eq!(RegisterFile::read(TOTAL_HITS_HI, &config, &status).unwrap(), 0x1234);
        assert_eq!(RegisterFile::read(DISCARDED_HITS, &config, &status).unwrap(), 7);
        assert_eq!(RegisterFile::read(RUN_STATE, &config, &status).unwrap(), 0x4);
        assert_eq!(RegisterFile::read(REFERENCE_CLOCK_LO, &config, &status).unwrap(), 2);
        assert_eq!(RegisterFile::read(REFERENCE_CLOCK_HI, &config, &status).unwrap(), 1);
        assert_eq!(
            RegisterFile::read(EXPECTED_LATENCY, &config, &status).unwrap(),
            2000
        );
    }
}

//! Timing constants of the sensor counter and the reference axis.

/// Largest value of the sensor's free-running local counter (15 bits).
pub const OVERFLOW_LOCAL: u16 = 0x7FFF;

/// Number of local counter ticks in one wrap period.
pub const WRAP_PERIOD: u64 = OVERFLOW_LOCAL as u64 + 1;

/// Local counter ticks per reference clock tick.
pub const DIVISION_RATIO: u64 = 5;

/// The reference clock is a 48-bit counter.
pub const REFERENCE_CLOCK_MASK: u64 = (1 << 48) - 1;

/// Extract `width` bits of `raw` starting at bit `shift`.
#[inline]
#[must_use]
pub(crate) fn bits(raw: u64, shift: u32, width: u32) -> u64 {
    (raw >> shift) & ((1 << width) - 1)
}

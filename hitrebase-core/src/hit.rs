//! Hit records at each stage of the rebasing pipeline.

use crate::error::{Error, Result};
use crate::timing::OVERFLOW_LOCAL;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest ASIC index (4 bits).
pub const MAX_ASIC: u8 = 0xF;
/// Largest channel index (5 bits).
pub const MAX_CHANNEL: u8 = 0x1F;
/// Largest fine time value (5 bits).
pub const MAX_FINE_TIME: u8 = 0x1F;
/// Largest link index (4 bits).
pub const MAX_LINK: u8 = 0xF;
/// Mask of the 13-bit coarse time output field.
pub const COARSE_TIME_MASK: u64 = 0x1FFF;

/// A hit as delivered by the sensor, timestamps still symbol-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawHit {
    /// ASIC index (4 bits).
    pub asic: u8,
    /// Channel index (5 bits).
    pub channel: u8,
    /// Symbol-coded local timestamp (15 bits).
    pub local_time: u16,
    /// Fine time interpolation (5 bits).
    pub fine_time: u8,
    /// Symbol-coded local timestamp of the energy measurement (15 bits).
    pub local_energy_time: u16,
    /// Energy measurement present.
    pub energy_valid: bool,
    /// Hit present.
    pub valid: bool,
    /// Hit flagged by the sensor.
    pub hit_error: bool,
}

impl RawHit {
    /// Creates a valid hit without energy measurement.
    #[must_use]
    pub fn new(asic: u8, channel: u8, local_time: u16, fine_time: u8) -> Self {
        Self {
            asic,
            channel,
            local_time,
            fine_time,
            local_energy_time: 0,
            energy_valid: false,
            valid: true,
            hit_error: false,
        }
    }

    /// Attaches an energy timestamp.
    #[must_use]
    pub fn with_energy_time(mut self, local_energy_time: u16) -> Self {
        self.local_energy_time = local_energy_time;
        self.energy_valid = true;
        self
    }

    /// Sets the sensor error flag.
    #[must_use]
    pub fn with_hit_error(mut self, hit_error: bool) -> Self {
        self.hit_error = hit_error;
        self
    }

    /// Checks every field against its hardware width.
    ///
    /// # Errors
    /// Returns [`Error::FieldOutOfRange`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("asic", u64::from(self.asic), u64::from(MAX_ASIC)),
            ("channel", u64::from(self.channel), u64::from(MAX_CHANNEL)),
            ("local_time", u64::from(self.local_time), u64::from(OVERFLOW_LOCAL)),
            ("fine_time", u64::from(self.fine_time), u64::from(MAX_FINE_TIME)),
            (
                "local_energy_time",
                u64::from(self.local_energy_time),
                u64::from(OVERFLOW_LOCAL),
            ),
        ];
        for (field, value, max) in checks {
            if value > max {
                return Err(Error::FieldOutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// Frame-level error markers attached by the upstream integrity filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameErrors {
    /// The frame carrying the hit was marked corrupt.
    pub frame_corrupt: bool,
    /// The frame failed its CRC.
    pub crc_err: bool,
}

impl FrameErrors {
    /// Returns true if any marker is set.
    #[inline]
    #[must_use]
    pub fn any(&self) -> bool {
        self.frame_corrupt || self.crc_err
    }
}

/// One word on the input hit channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InputWord {
    /// Link the word arrived on.
    pub link: u8,
    /// Hit payload; `hit.valid` is false for marker-only words.
    pub hit: RawHit,
    /// Upstream start-of-stream marker.
    pub start_of_stream: bool,
    /// Upstream end-of-stream marker.
    pub end_of_stream: bool,
    /// Frame-level error markers.
    pub errors: FrameErrors,
}

impl InputWord {
    /// A word carrying a hit.
    #[must_use]
    pub fn hit(link: u8, hit: RawHit) -> Self {
        Self {
            link,
            hit,
            ..Self::default()
        }
    }

    /// A marker-only word opening the link's stream.
    #[must_use]
    pub fn start_of_stream(link: u8) -> Self {
        Self {
            link,
            start_of_stream: true,
            ..Self::default()
        }
    }

    /// A marker-only word closing the link's stream.
    #[must_use]
    pub fn end_of_stream(link: u8) -> Self {
        Self {
            link,
            end_of_stream: true,
            ..Self::default()
        }
    }

    /// Attaches frame error markers.
    #[must_use]
    pub fn with_errors(mut self, errors: FrameErrors) -> Self {
        self.errors = errors;
        self
    }

    /// Returns true if the word carries a hit.
    #[inline]
    #[must_use]
    pub fn has_hit(&self) -> bool {
        self.hit.valid
    }
}

/// A hit whose symbol fields have been decoded to binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHit {
    /// The hit as received; symbol fields kept for bypass mode.
    pub raw: RawHit,
    /// Decoded local time.
    pub time: u16,
    /// Decoded local energy time.
    pub energy_time: u16,
}

/// A hit placed on the non-wrapping reference axis (local counter units).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebasedHit {
    /// The hit as received.
    pub raw: RawHit,
    /// Rebased primary time.
    pub time: u64,
    /// Rebased energy time.
    pub energy_time: u64,
    /// One wrap period was pulled back by the lookback rule.
    pub wrap_corrected: bool,
}

/// Energy-minus-time difference, or the marker for a hit without energy.
///
/// On the wire this is a 9-bit field whose top bit is the complement of the
/// energy-valid flag, so invalid hits land in the upper half of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EnergyDelta {
    /// Difference resized to the 8 value bits of the field.
    Valid(u8),
    /// No energy measurement.
    Invalid,
}

impl EnergyDelta {
    /// Marker bit of the 9-bit field.
    pub const INVALID_BIT: u16 = 0x100;

    /// Resizes a rebased difference into the field.
    #[inline]
    #[must_use]
    pub fn from_difference(difference: u64) -> Self {
        EnergyDelta::Valid((difference & 0xFF) as u8)
    }

    /// Packs into the 9-bit wire field.
    #[inline]
    #[must_use]
    pub fn to_bits(self) -> u16 {
        match self {
            EnergyDelta::Valid(value) => u16::from(value),
            EnergyDelta::Invalid => Self::INVALID_BIT,
        }
    }

    /// Unpacks a 9-bit wire field; bits above the field are ignored.
    #[inline]
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        if bits & Self::INVALID_BIT == 0 {
            EnergyDelta::Valid((bits & 0xFF) as u8)
        } else {
            EnergyDelta::Invalid
        }
    }

    /// Returns true for a measured difference.
    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(self, EnergyDelta::Valid(_))
    }
}

/// A fully converted hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProcessedHit {
    /// ASIC index (4 bits).
    pub asic: u8,
    /// Channel index (5 bits).
    pub channel: u8,
    /// Full-width coarse timestamp in reference ticks.
    pub timestamp: u64,
    /// Sub-tick phase, remainder of the division (0..=4).
    pub sub_coarse_time: u8,
    /// Fine time interpolation (5 bits).
    pub fine_time: u8,
    /// Energy minus time.
    pub energy: EnergyDelta,
    /// Upstream error flags survived admission.
    pub error: bool,
}

impl ProcessedHit {
    /// The 13-bit coarse time field.
    #[inline]
    #[must_use]
    pub fn coarse_time(&self) -> u16 {
        (self.timestamp & COARSE_TIME_MASK) as u16
    }
}

/// One word on the output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutputWord {
    /// Link the word belongs to.
    pub link: u8,
    /// Emitted hit, `None` on idle and marker-only cycles.
    pub hit: Option<ProcessedHit>,
    /// First hit of the link in this run.
    pub start_of_stream: bool,
    /// Link closed for this run.
    pub end_of_stream: bool,
    /// Timestamp fell outside the expected delay window.
    pub soundness_error: bool,
    /// End-of-run padding.
    pub empty: bool,
}

impl OutputWord {
    /// An idle cycle.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// A cycle carrying a hit.
    #[must_use]
    pub fn with_hit(link: u8, hit: ProcessedHit) -> Self {
        Self {
            link,
            hit: Some(hit),
            ..Self::default()
        }
    }

    /// A marker-only cycle closing `link`.
    #[must_use]
    pub fn end_marker(link: u8) -> Self {
        Self {
            link,
            end_of_stream: true,
            ..Self::default()
        }
    }

    /// An end-of-run padding cycle.
    #[must_use]
    pub fn padding() -> Self {
        Self {
            empty: true,
            ..Self::default()
        }
    }

    /// Returns true if a hit is emitted this cycle.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.hit.is_some()
    }

    /// Returns true if the cycle carries nothing at all.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.hit.is_none() && !self.end_of_stream && !self.empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_hit_builder() {
        let hit = RawHit::new(3, 7, 100, 5).with_energy_time(120);
        assert!(hit.valid);
        assert!(hit.energy_valid);
        assert_eq!(hit.local_energy_time, 120);
        assert!(hit.validate().is_ok());
    }

    #[test]
    fn test_raw_hit_validate_rejects_wide_fields() {
        let hit = RawHit::new(16, 0, 0, 0);
        assert_eq!(
            hit.validate(),
            Err(Error::FieldOutOfRange {
                field: "asic",
                value: 16
            })
        );

        let hit = RawHit::new(0, 0, 0x8000, 0);
        assert!(matches!(
            hit.validate(),
            Err(Error::FieldOutOfRange {
                field: "local_time",
                ..
            })
        ));
    }

    #[test]
    fn test_energy_delta_packing() {
        assert_eq!(EnergyDelta::Valid(0x2A).to_bits(), 0x2A);
        assert_eq!(EnergyDelta::Invalid.to_bits(), 0x100);
        assert_eq!(EnergyDelta::from_bits(0x1FF), EnergyDelta::Invalid);
        assert_eq!(EnergyDelta::from_bits(0x0FF), EnergyDelta::Valid(0xFF));
        // Resize keeps the low 8 bits.
        assert_eq!(EnergyDelta::from_difference(0x1_05), EnergyDelta::Valid(5));
    }

    #[test]
    fn test_coarse_time_field() {
        let hit = ProcessedHit {
            asic: 0,
            channel: 0,
            timestamp: 0x2001,
            sub_coarse_time: 0,
            fine_time: 0,
            energy: EnergyDelta::Invalid,
            error: false,
        };
        assert_eq!(hit.coarse_time(), 1);
    }

    #[test]
    fn test_output_word_kinds() {
        assert!(OutputWord::idle().is_idle());
        assert!(!OutputWord::padding().is_idle());
        assert!(OutputWord::end_marker(2).end_of_stream);
        assert!(!OutputWord::end_marker(2).is_valid());
    }
}

//! 64-bit stream records.
//!
//! Input streams are sequences of little-endian 64-bit records. The top
//! nibble selects the record kind and the next nibble the link:
//!
//! | kind  | meaning            | payload                                   |
//! |-------|--------------------|-------------------------------------------|
//! | `0x0` | tick advance       | bits 31..0: number of ticks (non-zero)    |
//! | `0x1` | start of stream    | -                                         |
//! | `0x2` | end of stream      | -                                         |
//! | `0x7` | control message    | bits 47..40: code, bits 15..0: payload    |
//! | `0xB` | hit                | see [`StreamRecord::encode`]               |
//!
//! Output words use kind `0xA` and are followed by the full-width
//! timestamp as a second 64-bit word.

use crate::command::ControlMessage;
use crate::error::{Error, Result};
use crate::hit::{EnergyDelta, FrameErrors, InputWord, OutputWord, ProcessedHit, RawHit};
use crate::timing::bits;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Record kinds, the top nibble of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum RecordKind {
    /// Tick advance.
    Advance = 0x0,
    /// Upstream start-of-stream marker.
    StartOfStream = 0x1,
    /// Upstream end-of-stream marker.
    EndOfStream = 0x2,
    /// Control-channel message.
    Control = 0x7,
    /// Processed output word.
    Output = 0xA,
    /// Sensor hit.
    Hit = 0xB,
}

impl RecordKind {
    /// Creates a `RecordKind` from the top nibble.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRecordKind`] for unassigned nibbles.
    pub fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0x0 => Ok(RecordKind::Advance),
            0x1 => Ok(RecordKind::StartOfStream),
            0x2 => Ok(RecordKind::EndOfStream),
            0x7 => Ok(RecordKind::Control),
            0xA => Ok(RecordKind::Output),
            0xB => Ok(RecordKind::Hit),
            _ => Err(Error::InvalidRecordKind(nibble)),
        }
    }

    /// Kind of a raw record.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRecordKind`] for unassigned nibbles.
    #[inline]
    pub fn of(raw: u64) -> Result<Self> {
        Self::from_nibble(bits(raw, 60, 4) as u8)
    }
}

/// A parsed input stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StreamRecord {
    /// Advance the clock by the given number of ticks.
    Advance(u32),
    /// Upstream start-of-stream marker on a link.
    StartOfStream { link: u8 },
    /// Upstream end-of-stream marker on a link.
    EndOfStream { link: u8 },
    /// Control message delivered with the current tick.
    Control(ControlMessage),
    /// A hit on a link.
    Hit {
        link: u8,
        hit: RawHit,
        errors: FrameErrors,
    },
}

impl StreamRecord {
    /// Parses a raw 64-bit record.
    ///
    /// # Errors
    /// Returns an error for unknown kinds, output records, or zero-length
    /// advances.
    pub fn parse(raw: u64) -> Result<Self> {
        let link = bits(raw, 56, 4) as u8;
        match RecordKind::of(raw)? {
            RecordKind::Advance => {
                let ticks = bits(raw, 0, 32) as u32;
                if ticks == 0 {
                    return Err(Error::InvalidRecord {
                        raw,
                        reason: "advance by zero ticks",
                    });
                }
                Ok(StreamRecord::Advance(ticks))
            }
            RecordKind::StartOfStream => Ok(StreamRecord::StartOfStream { link }),
            RecordKind::EndOfStream => Ok(StreamRecord::EndOfStream { link }),
            RecordKind::Control => Ok(StreamRecord::Control(ControlMessage::new(
                bits(raw, 40, 8) as u8,
                bits(raw, 0, 16) as u16,
            ))),
            RecordKind::Hit => {
                let hit = RawHit {
                    asic: bits(raw, 52, 4) as u8,
                    channel: bits(raw, 47, 5) as u8,
                    local_time: bits(raw, 32, 15) as u16,
                    fine_time: bits(raw, 27, 5) as u8,
                    local_energy_time: bits(raw, 12, 15) as u16,
                    energy_valid: bits(raw, 11, 1) == 1,
                    hit_error: bits(raw, 10, 1) == 1,
                    valid: bits(raw, 0, 1) == 1,
                };
                let errors = FrameErrors {
                    frame_corrupt: bits(raw, 9, 1) == 1,
                    crc_err: bits(raw, 8, 1) == 1,
                };
                Ok(StreamRecord::Hit { link, hit, errors })
            }
            RecordKind::Output => Err(Error::InvalidRecord {
                raw,
                reason: "output word in input stream",
            }),
        }
    }

    /// Encodes the record.
    ///
    /// Hit layout: link 59..56, asic 55..52, channel 51..47, local time
    /// 46..32, fine time 31..27, energy time 26..12, energy valid 11,
    /// hit error 10, frame corrupt 9, CRC error 8, valid 0. Fields wider
    /// than their slot are truncated.
    #[must_use]
    pub fn encode(&self) -> u64 {
        let kind = |kind: RecordKind| u64::from(kind as u8) << 60;
        let link = |link: u8| u64::from(link & 0xF) << 56;
        match *self {
            StreamRecord::Advance(ticks) => kind(RecordKind::Advance) | u64::from(ticks),
            StreamRecord::StartOfStream { link: l } => kind(RecordKind::StartOfStream) | link(l),
            StreamRecord::EndOfStream { link: l } => kind(RecordKind::EndOfStream) | link(l),
            StreamRecord::Control(msg) => {
                kind(RecordKind::Control) | (u64::from(msg.code) << 40) | u64::from(msg.payload)
            }
            StreamRecord::Hit {
                link: l,
                hit,
                errors,
            } => {
                kind(RecordKind::Hit)
                    | link(l)
                    | (u64::from(hit.asic & 0xF) << 52)
                    | (u64::from(hit.channel & 0x1F) << 47)
                    | (u64::from(hit.local_time & 0x7FFF) << 32)
                    | (u64::from(hit.fine_time & 0x1F) << 27)
                    | (u64::from(hit.local_energy_time & 0x7FFF) << 12)
                    | (u64::from(hit.energy_valid) << 11)
                    | (u64::from(hit.hit_error) << 10)
                    | (u64::from(errors.frame_corrupt) << 9)
                    | (u64::from(errors.crc_err) << 8)
                    | u64::from(hit.valid)
            }
        }
    }

    /// Link the record belongs to, if any.
    #[must_use]
    pub fn link(&self) -> Option<u8> {
        match *self {
            StreamRecord::StartOfStream { link }
            | StreamRecord::EndOfStream { link }
            | StreamRecord::Hit { link, .. } => Some(link),
            StreamRecord::Advance(_) | StreamRecord::Control(_) => None,
        }
    }

    /// Converts link records into an input-channel word.
    #[must_use]
    pub fn to_input_word(&self) -> Option<InputWord> {
        match *self {
            StreamRecord::StartOfStream { link } => Some(InputWord::start_of_stream(link)),
            StreamRecord::EndOfStream { link } => Some(InputWord::end_of_stream(link)),
            StreamRecord::Hit { link, hit, errors } => {
                Some(InputWord::hit(link, hit).with_errors(errors))
            }
            StreamRecord::Advance(_) | StreamRecord::Control(_) => None,
        }
    }
}

/// Codec for output words.
///
/// Word layout: kind `0xA` 63..60, link 59..56, start 55, end 54,
/// soundness error 53, empty 52, hit error 51, hit valid 50, asic 49..46,
/// channel 45..41, coarse time 40..28, sub-coarse time 27..25, fine time
/// 24..20, energy-minus-time 19..11.
pub struct OutputRecord;

impl OutputRecord {
    /// Size of one encoded output word plus its timestamp.
    pub const SIZE: usize = 16;

    /// Encodes a word and its full-width timestamp.
    #[must_use]
    pub fn encode(word: &OutputWord) -> (u64, u64) {
        let mut raw = (u64::from(RecordKind::Output as u8) << 60)
            | (u64::from(word.link & 0xF) << 56)
            | (u64::from(word.start_of_stream) << 55)
            | (u64::from(word.end_of_stream) << 54)
            | (u64::from(word.soundness_error) << 53)
            | (u64::from(word.empty) << 52);
        let mut timestamp = 0;
        if let Some(hit) = word.hit {
            raw |= (u64::from(hit.error) << 51)
                | (1 << 50)
                | (u64::from(hit.asic & 0xF) << 46)
                | (u64::from(hit.channel & 0x1F) << 41)
                | (u64::from(hit.coarse_time()) << 28)
                | (u64::from(hit.sub_coarse_time & 0x7) << 25)
                | (u64::from(hit.fine_time & 0x1F) << 20)
                | (u64::from(hit.energy.to_bits()) << 11);
            timestamp = hit.timestamp;
        }
        (raw, timestamp)
    }

    /// Decodes a word and its full-width timestamp.
    ///
    /// # Errors
    /// Returns an error if `raw` is not an output word, or if the timestamp
    /// disagrees with the packed 13-bit coarse time.
    pub fn decode(raw: u64, timestamp: u64) -> Result<OutputWord> {
        if RecordKind::of(raw)? != RecordKind::Output {
            return Err(Error::InvalidRecord {
                raw,
                reason: "not an output word",
            });
        }
        let hit = if bits(raw, 50, 1) == 1 {
            let coarse = bits(raw, 28, 13);
            if timestamp & crate::hit::COARSE_TIME_MASK != coarse {
                return Err(Error::InvalidRecord {
                    raw,
                    reason: "timestamp does not match coarse time",
                });
            }
            Some(ProcessedHit {
                asic: bits(raw, 46, 4) as u8,
                channel: bits(raw, 41, 5) as u8,
                timestamp,
                sub_coarse_time: bits(raw, 25, 3) as u8,
                fine_time: bits(raw, 20, 5) as u8,
                energy: EnergyDelta::from_bits(bits(raw, 11, 9) as u16),
                error: bits(raw, 51, 1) == 1,
            })
        } else {
            None
        };
        Ok(OutputWord {
            link: bits(raw, 56, 4) as u8,
            hit,
            start_of_stream: bits(raw, 55, 1) == 1,
            end_of_stream: bits(raw, 54, 1) == 1,
            soundness_error: bits(raw, 53, 1) == 1,
            empty: bits(raw, 52, 1) == 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn test_record_kind_from_nibble() {
        assert_eq!(RecordKind::from_nibble(0xB), Ok(RecordKind::Hit));
        assert_eq!(RecordKind::from_nibble(0x7), Ok(RecordKind::Control));
        assert_eq!(RecordKind::from_nibble(0x5), Err(Error::InvalidRecordKind(0x5)));
    }

    #[test]
    fn test_hit_record_fields() {
        let hit = RawHit::new(3, 7, 32_760, 5).with_energy_time(32_761);
        let record = StreamRecord::Hit {
            link: 2,
            hit,
            errors: FrameErrors {
                frame_corrupt: false,
                crc_err: true,
            },
        };
        let raw = record.encode();
        assert_eq!(raw >> 60, 0xB);
        assert_eq!((raw >> 56) & 0xF, 2);
        assert_eq!(StreamRecord::parse(raw), Ok(record));
    }

    #[test]
    fn test_control_record() {
        let record = StreamRecord::Control(Command::Address(0x1234).into());
        let parsed = StreamRecord::parse(record.encode()).unwrap();
        let StreamRecord::Control(msg) = parsed else {
            panic!("expected control record, got {parsed:?}");
        };
        assert_eq!(msg.command(), Ok(Command::Address(0x1234)));
    }

    #[test]
    fn test_zero_advance_rejected() {
        assert!(StreamRecord::parse(0).is_err());
        assert_eq!(StreamRecord::parse(3), Ok(StreamRecord::Advance(3)));
    }

    #[test]
    fn test_input_word_conversion() {
        let word = StreamRecord::EndOfStream { link: 4 }.to_input_word().unwrap();
        assert!(word.end_of_stream);
        assert!(!word.has_hit());
        assert_eq!(StreamRecord::Advance(1).to_input_word(), None);
    }

    #[test]
    fn test_output_record() {
        let hit = ProcessedHit {
            asic: 3,
            channel: 7,
            timestamp: 0x1_2345,
            sub_coarse_time: 4,
            fine_time: 5,
            energy: EnergyDelta::Valid(9),
            error: false,
        };
        let mut word = OutputWord::with_hit(3, hit);
        word.start_of_stream = true;
        let (raw, ts) = OutputRecord::encode(&word);
        assert_eq!(ts, 0x1_2345);
        assert_eq!(OutputRecord::decode(raw, ts), Ok(word));
        assert!(OutputRecord::decode(raw, ts + 1).is_err());
    }

    #[test]
    fn test_output_record_padding() {
        let (raw, ts) = OutputRecord::encode(&OutputWord::padding());
        assert_eq!(ts, 0);
        let decoded = OutputRecord::decode(raw, ts).unwrap();
        assert!(decoded.empty);
        assert!(decoded.hit.is_none());
    }
}

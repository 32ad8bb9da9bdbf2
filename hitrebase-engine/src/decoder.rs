//! Symbol decoding of the sensor's local counter.
//!
//! The sensor does not count in binary. Its 15-bit counter steps through a
//! code in which consecutive values differ in as few bits as possible, so
//! every timestamp has to be mapped back to binary before any arithmetic.
//! The mapping is a single precomputed table; each admitted hit uses both
//! of its ports in one cycle (primary time and energy time).

use crate::{Error, Result};
use hitrebase_core::{DecodedHit, RawHit, OVERFLOW_LOCAL};

const TABLE_SIZE: usize = OVERFLOW_LOCAL as usize + 1;

/// An encoder from binary counter values to sensor symbols.
pub trait SymbolCode {
    /// Symbol emitted by the sensor when its counter holds `value`.
    fn encode(&self, value: u16) -> u16;
}

/// Reflected binary Gray code.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrayCode;

impl SymbolCode for GrayCode {
    #[inline]
    fn encode(&self, value: u16) -> u16 {
        value ^ (value >> 1)
    }
}

/// Lookup table from sensor symbols to binary counter values.
#[derive(Debug, Clone)]
pub struct SymbolDecoder {
    table: Box<[u16]>,
}

impl Default for SymbolDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolDecoder {
    /// Creates the decoder for the default [`GrayCode`].
    #[must_use]
    pub fn new() -> Self {
        let table = (0..TABLE_SIZE)
            .map(|symbol| {
                let mut value = symbol as u16;
                let mut shift = value >> 1;
                while shift != 0 {
                    value ^= shift;
                    shift >>= 1;
                }
                value
            })
            .collect();
        Self { table }
    }

    /// Builds the table by inverting an arbitrary code.
    ///
    /// # Errors
    /// Fails if the code leaves the 15-bit symbol space or maps two values
    /// onto the same symbol; either would make the table partial.
    pub fn from_code<C: SymbolCode>(code: &C) -> Result<Self> {
        let mut slots: Vec<Option<u16>> = vec![None; TABLE_SIZE];
        for value in 0..=OVERFLOW_LOCAL {
            let symbol = code.encode(value);
            let slot = slots
                .get_mut(usize::from(symbol))
                .ok_or(Error::SymbolOutOfRange { value, symbol })?;
            if let Some(first) = *slot {
                return Err(Error::NonInjectiveCode {
                    symbol,
                    first,
                    second: value,
                });
            }
            *slot = Some(value);
        }
        // Injective on a domain the size of the table, so every slot is set.
        let table = slots.into_iter().map(Option::unwrap_or_default).collect();
        Ok(Self { table })
    }

    /// Decodes one symbol. Bits above the 15-bit field are ignored.
    #[inline]
    #[must_use]
    pub fn decode(&self, symbol: u16) -> u16 {
        self.table[usize::from(symbol & OVERFLOW_LOCAL)]
    }

    /// Both table ports in one cycle: (primary, energy).
    #[inline]
    #[must_use]
    pub fn decode_pair(&self, primary: u16, energy: u16) -> (u16, u16) {
        (self.decode(primary), self.decode(energy))
    }

    /// Decodes the time fields of a hit.
    #[must_use]
    pub fn decode_hit(&self, raw: RawHit) -> DecodedHit {
        let (time, energy_time) = self.decode_pair(raw.local_time, raw.local_energy_time);
        DecodedHit {
            raw,
            time,
            energy_time,
        }
    }
}

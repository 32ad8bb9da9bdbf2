//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration rejected by validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Symbol code maps a value outside the 15-bit symbol space.
    #[error("symbol code maps {value} to out-of-range symbol {symbol:#06x}")]
    SymbolOutOfRange { value: u16, symbol: u16 },

    /// Symbol code maps two values onto one symbol.
    #[error("symbol code is not injective: {first} and {second} both map to {symbol:#06x}")]
    NonInjectiveCode { symbol: u16, first: u16, second: u16 },

    /// Access to an unmapped register address.
    #[error("unknown register address: {0:#06x}")]
    UnknownRegister(u32),

    /// Write to a read-only register.
    #[error("register {0:#06x} is read-only")]
    ReadOnlyRegister(u32),

    /// JSON configuration parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] hitrebase_core::Error),
}

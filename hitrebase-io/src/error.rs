//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// A record that does not parse.
    #[error("record {index}: {source}")]
    Record {
        index: usize,
        source: hitrebase_core::Error,
    },

    /// Replay did not settle within its drain limit.
    #[error("replay still busy after {0} drain ticks")]
    DrainLimit(u64),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] hitrebase_core::Error),

    /// Engine error.
    #[error("engine error: {0}")]
    EngineError(#[from] hitrebase_engine::Error),
}

//! Error types for hitrebase-core.

use thiserror::Error;

/// Result type alias for hitrebase operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for hitrebase operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Control code that maps to no known command.
    #[error("unrecognized command code: {0:#04x}")]
    UnknownCommand(u8),

    /// Command name that maps to no known command.
    #[error("unrecognized command name: {0}")]
    UnknownCommandName(String),

    /// Invalid record kind nibble.
    #[error("invalid record kind: {0:#x}")]
    InvalidRecordKind(u8),

    /// Structurally invalid record.
    #[error("invalid record {raw:#018x}: {reason}")]
    InvalidRecord { raw: u64, reason: &'static str },

    /// A field value does not fit its hardware width.
    #[error("{field} out of range: {value}")]
    FieldOutOfRange { field: &'static str, value: u64 },
}

//! hitrebase-core: Core types for detector hit timestamp rebasing.
//!
//! This crate provides the data model shared by the rebasing engine,
//! the file I/O layer and the command-line tools: hit records at every
//! pipeline stage, run-control command codes, and the 64-bit stream
//! record codec.
//!

pub mod command;
pub mod error;
pub mod hit;
pub mod record;
pub mod timing;

pub use command::{Command, ControlMessage};
pub use error::{Error, Result};
pub use hit::{
    DecodedHit, EnergyDelta, FrameErrors, InputWord, OutputWord, ProcessedHit, RawHit, RebasedHit,
};
pub use record::{OutputRecord, RecordKind, StreamRecord};
pub use timing::{DIVISION_RATIO, OVERFLOW_LOCAL, REFERENCE_CLOCK_MASK, WRAP_PERIOD};

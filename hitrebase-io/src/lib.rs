//! hitrebase-io: Memory-mapped stream I/O and replay for hitrebase.
//!
//! This crate reads recorded input streams through memory-mapped files
//! via memmap2, replays them through the rebasing engine, and writes the
//! resulting output words.
//!

mod error;
mod reader;
pub mod replay;
mod writer;

pub use error::{Error, Result};
pub use reader::{MappedFileReader, StreamFileReader, StreamSummary, RECORD_SIZE};
pub use replay::{Replay, ReplaySummary};
pub use writer::{decode_output, OutputFileWriter, OutputFormat, StreamFileWriter};

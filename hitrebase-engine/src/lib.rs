//! hitrebase-engine: cycle-accurate timestamp rebasing.
//!
//! Translates the wrapping, symbol-encoded local timestamps of detector
//! hits into a monotonic timestamp on the reference clock.
//!
//! # Key Components
//!
//! - [`SymbolDecoder`] - Symbol to binary lookup table
//! - [`EpochTracker`] - Reference clock, wrap counter and wrap disambiguation
//! - [`ConvertPipeline`] - Decode, rebase and divide stages
//! - [`RunControl`] - Run-control state machine
//! - [`OutputAssembler`] - Stream markers and soundness flags
//! - [`Processor`] - All of the above, advanced one tick at a time
//!
//! # Tick Order
//!
//! 1. Staged register writes are applied
//! 2. Admission, gated by the run state at the start of the tick
//! 3. Every pipeline stage shifts; the rebase stage reads the tracker
//! 4. Emission, gated by the run state at the start of the tick
//! 5. Run control takes the control message and evaluates the held command
//! 6. The epoch tracker advances (or is held in reset)

pub mod arbiter;
pub mod assembler;
pub mod config;
pub mod convert;
pub mod debug;
pub mod decoder;
pub mod epoch;
mod error;
pub mod processor;
pub mod registers;
pub mod run_control;

pub use arbiter::{LinkArbiter, LINK_COUNT};
pub use assembler::{is_sound, OutputAssembler};
pub use config::{HitMode, RunConfig};
pub use convert::{ConvertPipeline, ConvertedHit, DelayLine, PIPELINE_LATENCY};
pub use debug::{ArrivalDelta, BurstProfile, DebugChannels, DebugTap};
pub use decoder::{GrayCode, SymbolCode, SymbolDecoder};
pub use epoch::{EpochState, EpochTracker};
pub use error::{Error, Result};
pub use processor::{Counters, Processor, TickInput, TickOutput};
pub use registers::RegisterFile;
pub use run_control::{ResetPhase, RunControl, RunState};

// Re-export core types for convenience
pub use hitrebase_core::{Command, ControlMessage, InputWord, OutputWord, ProcessedHit, RawHit};

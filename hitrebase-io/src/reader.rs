//! Memory-mapped stream readers.

use crate::{Error, Result};
use hitrebase_core::StreamRecord;
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::ops::Add;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Size of one input record in bytes.
pub const RECORD_SIZE: usize = 8;

/// Number of links addressable by a record.
const LINKS: usize = 16;

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire file
/// into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the reader was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn record_word(chunk: &[u8]) -> u64 {
    let mut bytes = [0u8; RECORD_SIZE];
    bytes.copy_from_slice(chunk);
    u64::from_le_bytes(bytes)
}

/// Record counts of a stream, per kind and per link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamSummary {
    /// Total records.
    pub records: usize,
    /// Tick advance records.
    pub advances: usize,
    /// Ticks covered by all advances.
    pub ticks: u64,
    /// Control records.
    pub controls: usize,
    /// Start-of-stream markers.
    pub start_markers: usize,
    /// End-of-stream markers.
    pub end_markers: usize,
    /// Hit records.
    pub hits: usize,
    /// Hit records per link.
    pub hits_per_link: [usize; LINKS],
    /// Records that do not parse.
    pub invalid: usize,
}

impl StreamSummary {
    fn of(raw: u64) -> Self {
        let mut summary = Self {
            records: 1,
            ..Self::default()
        };
        match StreamRecord::parse(raw) {
            Ok(StreamRecord::Advance(ticks)) => {
                summary.advances = 1;
                summary.ticks = u64::from(ticks);
            }
            Ok(StreamRecord::Control(_)) => summary.controls = 1,
            Ok(StreamRecord::StartOfStream { .. }) => summary.start_markers = 1,
            Ok(StreamRecord::EndOfStream { .. }) => summary.end_markers = 1,
            Ok(StreamRecord::Hit { link, .. }) => {
                summary.hits = 1;
                summary.hits_per_link[usize::from(link & 0xF)] = 1;
            }
            Err(_) => summary.invalid = 1,
        }
        summary
    }
}

impl Add for StreamSummary {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.records += other.records;
        self.advances += other.advances;
        self.ticks += other.ticks;
        self.controls += other.controls;
        self.start_markers += other.start_markers;
        self.end_markers += other.end_markers;
        self.hits += other.hits;
        self.invalid += other.invalid;
        for (total, count) in self.hits_per_link.iter_mut().zip(other.hits_per_link) {
            *total += count;
        }
        self
    }
}

/// A reader for recorded input streams.
pub struct StreamFileReader {
    reader: MappedFileReader,
}

impl StreamFileReader {
    /// Opens a stream file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            reader: MappedFileReader::open(path)?,
        })
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Returns the number of 8-byte records in the file.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.reader.len() / RECORD_SIZE
    }

    fn check_size(&self) -> Result<()> {
        if self.reader.len() % RECORD_SIZE != 0 {
            return Err(Error::InvalidFormat(format!(
                "file size {} is not a multiple of {RECORD_SIZE} (file: {})",
                self.reader.len(),
                self.reader.path().display()
            )));
        }
        Ok(())
    }

    /// Raw little-endian record words, in file order.
    ///
    /// # Errors
    /// Returns an error if the file size is not a whole number of records.
    pub fn raw_records(&self) -> Result<impl Iterator<Item = u64> + '_> {
        self.check_size()?;
        Ok(self.reader.as_bytes().chunks_exact(RECORD_SIZE).map(record_word))
    }

    /// Parses every record, in parallel.
    ///
    /// # Errors
    /// Returns an error if the file size is invalid or any record fails to
    /// parse; the error names an offending record.
    pub fn read_records(&self) -> Result<Vec<StreamRecord>> {
        self.check_size()?;
        self.reader
            .as_bytes()
            .par_chunks_exact(RECORD_SIZE)
            .enumerate()
            .map(|(index, chunk)| {
                StreamRecord::parse(record_word(chunk)).map_err(|source| Error::Record { index, source })
            })
            .collect()
    }

    /// Counts records per kind and per link, in parallel. Invalid records
    /// are counted rather than rejected.
    ///
    /// # Errors
    /// Returns an error if the file size is not a whole number of records.
    pub fn summarize(&self) -> Result<StreamSummary> {
        self.check_size()?;
        Ok(self
            .reader
            .as_bytes()
            .par_chunks_exact(RECORD_SIZE)
            .map(|chunk| StreamSummary::of(record_word(chunk)))
            .reduce(StreamSummary::default, |a, b| a + b))
    }
}

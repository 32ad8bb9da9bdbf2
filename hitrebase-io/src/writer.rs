//! File writers for output words and input streams.

use crate::Result;
use hitrebase_core::{OutputRecord, OutputWord, StreamRecord};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// On-disk format of processed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Packed output word followed by the full-width timestamp, 16 bytes
    /// per word.
    #[default]
    Binary,
    /// One line per word.
    Csv,
}

impl OutputFormat {
    /// Picks the format from a file extension; anything but `.csv` is binary.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
            _ => OutputFormat::Binary,
        }
    }
}

const CSV_HEADER: &str = "link,timestamp,coarse_time,sub_coarse_time,fine_time,asic,channel,energy,valid,error,start,end,soundness_error,empty";

/// Writer for processed output words.
pub struct OutputFileWriter {
    writer: BufWriter<File>,
    format: OutputFormat,
    words: usize,
}

impl OutputFileWriter {
    /// Creates a new file writer, choosing the format from the extension.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let format = OutputFormat::from_path(path.as_ref());
        Self::create_with_format(path, format)
    }

    /// Creates a new file writer in the given format.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or the CSV header
    /// cannot be written.
    pub fn create_with_format<P: AsRef<Path>>(path: P, format: OutputFormat) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        if format == OutputFormat::Csv {
            writeln!(writer, "{CSV_HEADER}")?;
        }
        Ok(Self {
            writer,
            format,
            words: 0,
        })
    }

    /// Writes one output word.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn write_word(&mut self, word: &OutputWord) -> Result<()> {
        match self.format {
            OutputFormat::Binary => {
                let (raw, timestamp) = OutputRecord::encode(word);
                self.writer.write_all(&raw.to_le_bytes())?;
                self.writer.write_all(&timestamp.to_le_bytes())?;
            }
            OutputFormat::Csv => {
                let (timestamp, coarse, sub, fine, asic, channel, energy, error) =
                    match word.hit {
                        Some(hit) => (
                            hit.timestamp.to_string(),
                            hit.coarse_time().to_string(),
                            hit.sub_coarse_time.to_string(),
                            hit.fine_time.to_string(),
                            hit.asic.to_string(),
                            hit.channel.to_string(),
                            hit.energy.to_bits().to_string(),
                            u8::from(hit.error).to_string(),
                        ),
                        None => Default::default(),
                    };
                writeln!(
                    self.writer,
                    "{},{timestamp},{coarse},{sub},{fine},{asic},{channel},{energy},{},{error},{},{},{},{}",
                    word.link,
                    u8::from(word.is_valid()),
                    u8::from(word.start_of_stream),
                    u8::from(word.end_of_stream),
                    u8::from(word.soundness_error),
                    u8::from(word.empty),
                )?;
            }
        }
        self.words += 1;
        Ok(())
    }

    /// Writes a batch of output words.
    ///
    /// # Errors
    /// Returns an error if any write fails.
    pub fn write_words(&mut self, words: &[OutputWord]) -> Result<()> {
        words.iter().try_for_each(|word| self.write_word(word))
    }

    /// Number of words written.
    #[must_use]
    pub fn words_written(&self) -> usize {
        self.words
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writer for input streams.
pub struct StreamFileWriter {
    writer: BufWriter<File>,
}

impl StreamFileWriter {
    /// Creates a new stream file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Appends records.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn write_records(&mut self, records: &[StreamRecord]) -> Result<()> {
        for record in records {
            self.writer.write_all(&record.encode().to_le_bytes())?;
        }
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Decodes a binary output file written by [`OutputFileWriter`].
///
/// # Errors
/// Returns an error if the data is not a whole number of words or a word
/// fails to decode.
pub fn decode_output(data: &[u8]) -> Result<Vec<OutputWord>> {
    if data.len() % OutputRecord::SIZE != 0 {
        return Err(crate::Error::InvalidFormat(format!(
            "output size {} is not a multiple of {}",
            data.len(),
            OutputRecord::SIZE
        )));
    }
    data.chunks_exact(OutputRecord::SIZE)
        .map(|chunk| {
            let (raw, timestamp) = chunk.split_at(8);
            let raw = u64::from_le_bytes(raw.try_into().unwrap_or_default());
            let timestamp = u64::from_le_bytes(timestamp.try_into().unwrap_or_default());
            Ok(OutputRecord::decode(raw, timestamp)?)
        })
        .collect()
}

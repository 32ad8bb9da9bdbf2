//! hitrebase CLI
//!
//! Replays recorded front-end streams through the rebasing datapath.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};
use hitrebase_engine::{Processor, RunConfig, SymbolDecoder};
use hitrebase_io::{OutputFileWriter, Replay, StreamFileReader};
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    HitrebaseIo(#[from] hitrebase_io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] hitrebase_engine::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Timestamp rebasing for free-running detector front-ends.
#[derive(Parser)]
#[command(name = "hitrebase")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded stream and write the output words
    Replay {
        /// Input stream file
        input: PathBuf,

        /// Output file path (.csv for text, anything else for binary)
        #[arg(short, long)]
        output: PathBuf,

        /// JSON run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the enabled link mask
        #[arg(long, value_parser = parse_u16)]
        links: Option<u16>,

        /// Override the expected upstream latency (reference ticks)
        #[arg(long)]
        expected_latency: Option<u32>,

        /// Maximum ticks spent draining after the stream ends
        #[arg(long)]
        drain_limit: Option<u64>,

        /// Print the effective configuration as JSON and exit
        #[arg(long)]
        show_config: bool,
    },

    /// Show record counts of a stream file
    Info {
        /// Input stream file
        input: PathBuf,
    },

    /// Decode a sensor symbol to its binary counter value
    Decode {
        /// 15-bit symbol, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_u16)]
        symbol: u16,
    },
}

fn parse_u16(value: &str) -> std::result::Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid value '{value}': {err}"))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Replay {
            input,
            output,
            config,
            links,
            expected_latency,
            drain_limit,
            show_config,
        } => {
            let mut run_config = match &config {
                Some(path) => RunConfig::from_file(path)?,
                None => RunConfig::default(),
            };
            if let Some(mask) = links {
                run_config = run_config.with_enabled_links(mask);
            }
            if let Some(ticks) = expected_latency {
                run_config = run_config.with_expected_latency(ticks);
            }
            run_config.validate()?;

            if show_config {
                println!("{}", serde_json::to_string_pretty(&run_config)?);
                return Ok(());
            }

            let start = Instant::now();
            let reader = StreamFileReader::open(&input)?;
            let records = reader.read_records()?;
            info!("read {} records from {}", records.len(), input.display());

            let processor = Processor::new(run_config)?;
            let mut replay = Replay::new(processor);
            if let Some(limit) = drain_limit {
                replay = replay.with_drain_limit(limit);
            }

            let mut writer = OutputFileWriter::create(&output)?;
            debug!("writing output to {}", output.display());
            let summary = replay.run(&records, |tick| writer.write_word(&tick.word))?;
            writer.flush()?;

            let elapsed = start.elapsed();
            let counters = summary.counters;
            println!(
                "Replayed {} records over {} ticks in {:.2}s",
                summary.records,
                summary.ticks,
                elapsed.as_secs_f64()
            );
            println!("Output words: {}", writer.words_written());
            println!("Hits admitted: {}", counters.total_hits);
            println!("Hits emitted: {}", counters.emitted);
            println!("Hits discarded: {}", counters.discarded_hits);
            println!("Hits suppressed: {}", counters.suppressed);
            println!("Soundness errors: {}", counters.soundness_errors);
            println!("End markers: {}", counters.end_markers);
            println!("Timed-out links: {}", counters.timed_out_links);
            if summary.dropped_by_arbiter > 0 {
                println!("Dropped (disabled links): {}", summary.dropped_by_arbiter);
            }
            if summary.stranded > 0 {
                println!("Stranded upstream: {}", summary.stranded);
            }
            println!("Final state: {}", summary.final_state);
        }

        Commands::Info { input } => {
            let reader = StreamFileReader::open(&input)?;
            let file_size = reader.file_size();
            let summary = reader.summarize()?;

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                file_size,
                file_size as f64 / 1_000_000.0
            );
            println!("Records: {}", summary.records);
            println!("Tick advances: {} ({} ticks)", summary.advances, summary.ticks);
            println!("Control messages: {}", summary.controls);
            println!("Start markers: {}", summary.start_markers);
            println!("End markers: {}", summary.end_markers);
            println!("Hits: {}", summary.hits);
            if summary.invalid > 0 {
                println!("Invalid records: {}", summary.invalid);
            }
            for (link, &hits) in summary.hits_per_link.iter().enumerate() {
                if hits > 0 {
                    println!("  link {:>2}: {} hits", link, hits);
                }
            }
        }

        Commands::Decode { symbol } => {
            let value = SymbolDecoder::new().decode(symbol);
            println!("{:#06x} -> {} ({:#017b})", symbol, value, value);
        }
    }

    Ok(())
}

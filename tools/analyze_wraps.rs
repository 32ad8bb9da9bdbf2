//! Analyze local-time wraps per link in a recorded stream.
//!
//! Run with: cargo run --bin `analyze-wraps` -- <`stream_file`>

use std::env;
use std::fs::File;
use std::io::Read;

const LINKS: usize = 16;
const WRAP_PERIOD: u32 = 1 << 15;

fn gray_to_binary(symbol: u16) -> u16 {
    let mut value = symbol & 0x7FFF;
    let mut shift = value >> 1;
    while shift != 0 {
        value ^= shift;
        shift >>= 1;
    }
    value
}

#[derive(Default)]
struct LinkStats {
    hits: usize,
    wraps: usize,
    backsteps: usize,
    last: Option<(usize, u64, u16)>,
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <stream_file>", args[0]);
        std::process::exit(1);
    }

    let mut file = File::open(&args[1])?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    if data.len() % 8 != 0 {
        eprintln!("Warning: {} trailing bytes ignored", data.len() % 8);
    }

    let mut links: Vec<LinkStats> = (0..LINKS).map(|_| LinkStats::default()).collect();
    let mut tick: u64 = 0;
    let mut record_count = 0usize;

    for (i, chunk) in data.chunks_exact(8).enumerate() {
        record_count += 1;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        let raw = u64::from_le_bytes(bytes);
        let kind = raw >> 60;

        // Tick advance
        if kind == 0x0 {
            tick += raw & 0xFFFF_FFFF;
            continue;
        }
        if kind != 0xB {
            continue;
        }

        let link = ((raw >> 56) & 0xF) as usize;
        let local = gray_to_binary(((raw >> 32) & 0x7FFF) as u16);
        let stats = &mut links[link];
        stats.hits += 1;

        if let Some((last_idx, last_tick, last_local)) = stats.last {
            if local < last_local {
                // A drop of more than half the period is a wrap; anything
                // smaller is hits arriving out of order.
                if u32::from(last_local - local) > WRAP_PERIOD / 2 {
                    stats.wraps += 1;
                    println!("=== LINK {link} WRAP ===");
                    println!(
                        "Record {i} (tick {tick}): local {last_local} -> {local} \
                         (previous hit at record {last_idx}, tick {last_tick})"
                    );
                } else {
                    stats.backsteps += 1;
                }
            }
        }
        stats.last = Some((i, tick, local));
    }

    println!("\n{:<6} | {:>10} | {:>6} | {:>10}", "Link", "Hits", "Wraps", "Backsteps");
    println!("{:-<42}", "");
    for (link, stats) in links.iter().enumerate() {
        if stats.hits > 0 {
            println!(
                "{:<6} | {:>10} | {:>6} | {:>10}",
                link, stats.hits, stats.wraps, stats.backsteps
            );
        }
    }

    println!("\nAnalysis complete. {record_count} records over {tick} ticks.");
    Ok(())
}

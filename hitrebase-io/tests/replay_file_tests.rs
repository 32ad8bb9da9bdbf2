use hitrebase_core::{Command, FrameErrors, RawHit, StreamRecord, WRAP_PERIOD};
use hitrebase_engine::{GrayCode, Processor, RunConfig, RunState, SymbolCode};
use hitrebase_io::{
    decode_output, OutputFileWriter, OutputFormat, Replay, StreamFileReader, StreamFileWriter,
};
use tempfile::tempdir;

const DELAY: u64 = 10;

/// A run on two links crossing the first local counter wrap, closed by
/// EndRun and both end markers.
fn recorded_run() -> Vec<StreamRecord> {
    let mut records = vec![
        StreamRecord::Control(Command::RunPrepare.into()),
        StreamRecord::Advance(1),
        StreamRecord::Control(Command::Sync.into()),
        StreamRecord::Advance(1),
        StreamRecord::Control(Command::StartRun.into()),
        StreamRecord::Advance(6500),
    ];
    // Reference clock is 6500 here; one hit every other tick, links alternating.
    for reference in (6500..6620).step_by(2) {
        let local = ((reference - DELAY) * 5 % WRAP_PERIOD) as u16;
        records.push(StreamRecord::Hit {
            link: ((reference / 2) % 2) as u8,
            hit: RawHit::new(1, 2, GrayCode.encode(local), 3),
            errors: FrameErrors::default(),
        });
        records.push(StreamRecord::Advance(2));
    }
    records.push(StreamRecord::Control(Command::EndRun.into()));
    records.push(StreamRecord::Advance(10));
    records.push(StreamRecord::EndOfStream { link: 0 });
    records.push(StreamRecord::EndOfStream { link: 1 });
    records.push(StreamRecord::Advance(20));
    records
}

#[test]
fn test_replay_file_round_trip() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("run.bin");
    let output = dir.path().join("out.bin");

    let mut writer = StreamFileWriter::create(&input).unwrap();
    writer.write_records(&recorded_run()).unwrap();
    writer.flush().unwrap();

    let reader = StreamFileReader::open(&input).unwrap();
    let records = reader.read_records().unwrap();
    assert_eq!(records, recorded_run());

    let config = RunConfig::default().with_enabled_links(0b11);
    let mut replay = Replay::new(Processor::new(config).unwrap());
    let mut out = OutputFileWriter::create(&output).unwrap();
    let summary = replay.run(&records, |tick| out.write_word(&tick.word)).unwrap();
    out.flush().unwrap();

    assert_eq!(summary.counters.emitted, 60);
    assert_eq!(summary.counters.soundness_errors, 0);
    assert_eq!(summary.counters.end_markers, 2);
    assert_eq!(summary.final_state, RunState::Flushing);

    let words = decode_output(&std::fs::read(&output).unwrap()).unwrap();
    let timestamps: Vec<u64> = words.iter().filter_map(|w| w.hit.map(|h| h.timestamp)).collect();
    assert_eq!(timestamps.len(), 60);
    assert!(timestamps.windows(2).all(|pair| pair[1] == pair[0] + 2));
    assert_eq!(timestamps[0], 6500 - DELAY);

    let markers: Vec<u8> = words.iter().filter(|w| w.end_of_stream).map(|w| w.link).collect();
    assert_eq!(markers, [0, 1]);
    assert!(words.last().is_some_and(|w| w.empty));
    let starts = words.iter().filter(|w| w.start_of_stream).count();
    assert_eq!(starts, 2);
}

#[test]
fn test_csv_output() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.csv");

    let config = RunConfig::default().with_enabled_links(0b11);
    let mut replay = Replay::new(Processor::new(config).unwrap());
    let mut out = OutputFileWriter::create(&output).unwrap();
    replay.run(&recorded_run(), |tick| out.write_word(&tick.word)).unwrap();
    out.flush().unwrap();

    let content = std::fs::read_to_string(&output).unwrap();
    assert!(content.starts_with("link,timestamp,"));
    assert!(content.lines().nth(1).is_some_and(|line| line.starts_with("0,6490,")));
    assert_eq!(OutputFormat::from_path(&output), OutputFormat::Csv);
}

#[test]
fn test_summary_counts_records() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("run.bin");
    let mut writer = StreamFileWriter::create(&input).unwrap();
    writer.write_records(&recorded_run()).unwrap();
    writer.flush().unwrap();

    let summary = StreamFileReader::open(&input).unwrap().summarize().unwrap();
    assert_eq!(summary.records, recorded_run().len());
    assert_eq!(summary.hits, 60);
    assert_eq!(summary.hits_per_link[0], 30);
    assert_eq!(summary.hits_per_link[1], 30);
    assert_eq!(summary.controls, 4);
    assert_eq!(summary.end_markers, 2);
    assert_eq!(summary.ticks, 1 + 1 + 6500 + 120 + 10 + 20);
    assert_eq!(summary.invalid, 0);
}

//! End-to-end tests: producer thread -> cyclic buffer -> writer thread -> file.

use avrec_core::clock::{FixedClock, WallClock};
use avrec_core::config::StreamBufferConfig;
use avrec_storage::file_format::{FileHeader, FileNaming, StreamKind};
use avrec_storage::{summarize, CyclicStreamBuffer, RecordingFileWriter, RecordingReader};
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn fixed_clock() -> Arc<dyn WallClock> {
    Arc::new(FixedClock(
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 15, 30)
            .unwrap(),
    ))
}

fn wait_until_empty(buffer: &CyclicStreamBuffer) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while buffer.occupied() > 0 {
        assert!(Instant::now() < deadline, "writer did not drain the buffer");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn audio_pipeline(dir: &Path) -> (Arc<CyclicStreamBuffer>, avrec_storage::StreamWorker) {
    let buffer = Arc::new(CyclicStreamBuffer::new(&StreamBufferConfig::new("audio", 1 << 20)).unwrap());
    let writer = RecordingFileWriter::builder("audio", FileNaming::audio(dir))
        .header(FileHeader::Audio {
            sample_rate: 44100,
            channels: 2,
        })
        .clock(fixed_clock())
        .build();
    let worker = writer
        .spawn(Arc::clone(&buffer), Duration::from_millis(5))
        .unwrap();
    (buffer, worker)
}

/// Armed flags F,F,T,T,T,F produce one read-only file holding records 2..=4.
#[test]
fn test_armed_window_becomes_one_file() {
    let dir = TempDir::new().unwrap();
    let (buffer, worker) = audio_pipeline(dir.path());

    let armed = [false, false, true, true, true, false];
    for (i, &flag) in armed.iter().enumerate() {
        buffer.set_armed(flag);
        buffer.insert(&[i as u8; 16], 5_000 + i as u64).unwrap();
    }
    wait_until_empty(&buffer);
    worker.stop().unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);

    let path = dir.path().join("2024-03-01--10-15-30_audio_00.aud");
    assert_eq!(entries[0], path);
    assert!(std::fs::metadata(&path).unwrap().permissions().readonly());

    let mut reader = RecordingReader::open(&path).unwrap();
    assert_eq!(
        *reader.header(),
        FileHeader::Audio {
            sample_rate: 44100,
            channels: 2
        }
    );
    for i in 2..5u8 {
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.timestamp, 5_000 + i as u64);
        assert_eq!(record.payload, vec![i; 16]);
    }
    assert!(reader.next_record().unwrap().is_none());
}

/// Stopping while armed closes the file cleanly.
#[test]
fn test_stop_while_recording_closes_file() {
    let dir = TempDir::new().unwrap();
    let (buffer, worker) = audio_pipeline(dir.path());

    buffer.set_armed(true);
    for i in 0..10u64 {
        buffer.insert(&[0u8; 32], i).unwrap();
    }
    wait_until_empty(&buffer);
    worker.stop().unwrap();

    let summary = summarize(dir.path().join("2024-03-01--10-15-30_audio_00.aud")).unwrap();
    assert_eq!(summary.kind(), StreamKind::Audio);
    assert_eq!(summary.records, 10);
    assert_eq!(summary.first_timestamp, Some(0));
    assert_eq!(summary.last_timestamp, Some(9));
    assert!(!summary.truncated);
}

/// The writer notices a stop request even if no data ever arrives.
#[test]
fn test_idle_writer_stops_promptly() {
    let dir = TempDir::new().unwrap();
    let (_buffer, worker) = audio_pipeline(dir.path());

    let started = Instant::now();
    worker.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// A missing storage directory ends the writer with a fatal open error.
#[test]
fn test_unwritable_storage_fails_the_stream() {
    let dir = TempDir::new().unwrap();
    let (buffer, worker) = audio_pipeline(&dir.path().join("gone"));

    buffer.set_armed(true);
    buffer.insert(b"period", 1).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !worker.is_finished() {
        assert!(Instant::now() < deadline, "writer kept running");
        std::thread::sleep(Duration::from_millis(1));
    }
    let err = worker.join().unwrap_err();
    assert!(err.is_fatal());
}

//! Recording file writer: the primary consumer of a stream buffer.
//!
//! The writer turns the armed flag carried on each record into a sequence of
//! recording files. A false-to-true transition opens a new file named after
//! the local wall-clock time and writes the stream header; every armed record
//! is appended; a true-to-false transition (or an explicit stop) closes the
//! file and makes it read-only.
//!
//! Because the flag rides on the records themselves, file boundaries line up
//! exactly with the data that was captured while armed, regardless of how
//! far the writer lags behind the producer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use avrec_core::config::StreamBufferConfig;
//! use avrec_storage::cyclic_buffer::CyclicStreamBuffer;
//! use avrec_storage::file_format::{FileHeader, FileNaming};
//! use avrec_storage::file_writer::RecordingFileWriter;
//!
//! # fn main() -> avrec_core::AppResult<()> {
//! let buffer = Arc::new(CyclicStreamBuffer::new(&StreamBufferConfig::new("video_00", 1 << 20))?);
//! let writer = RecordingFileWriter::builder("video_00", FileNaming::video("/videodat", 0))
//!     .header(FileHeader::Video)
//!     .build();
//! let worker = writer.spawn(Arc::clone(&buffer), Duration::from_millis(100))?;
//!
//! buffer.set_armed(true);
//! buffer.insert(b"frame", avrec_core::now_millis())?;
//! buffer.set_armed(false);
//!
//! worker.stop()?;
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use avrec_core::clock::{SystemClock, WallClock};
use avrec_core::error::{AppResult, AvError};

use crate::cyclic_buffer::CyclicStreamBuffer;
use crate::file_format::{write_record, FileHeader, FileNaming, HeaderProvider, RECORD_HEADER_SIZE};
use crate::worker::StreamWorker;

/// Writer state. `Recording` owns the open file.
pub enum WriterState {
    /// No file open
    Idle,
    /// Appending armed records to `path`
    Recording {
        /// File being written
        path: PathBuf,
        /// Buffered handle
        file: BufWriter<File>,
    },
}

impl WriterState {
    /// Whether a file is open
    pub fn is_open(&self) -> bool {
        matches!(self, WriterState::Recording { .. })
    }
}

impl std::fmt::Debug for WriterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterState::Idle => write!(f, "Idle"),
            WriterState::Recording { path, .. } => {
                f.debug_struct("Recording").field("path", path).finish()
            }
        }
    }
}

/// Shared view of the file a writer is currently recording to.
///
/// Cloned out of the writer before it moves onto its thread, so that a UI or
/// CLI can display the current rotation.
#[derive(Debug, Clone, Default)]
pub struct ActiveFile(Arc<RwLock<Option<PathBuf>>>);

impl ActiveFile {
    /// Path of the open file, if any
    pub fn get(&self) -> Option<PathBuf> {
        self.0.read().clone()
    }

    /// File name of the open file without its directory
    pub fn display_name(&self) -> Option<String> {
        self.0
            .read()
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn set(&self, path: Option<PathBuf>) {
        *self.0.write() = path;
    }
}

/// Counters of a [`RecordingFileWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Files opened
    pub files_opened: u64,
    /// Files closed
    pub files_closed: u64,
    /// Records appended to files
    pub records_written: u64,
    /// Bytes written including headers and record prefixes
    pub bytes_written: u64,
    /// Records seen while disarmed
    pub records_skipped: u64,
}

/// Consumes records and writes the armed ones to rotating files.
pub struct RecordingFileWriter {
    label: String,
    naming: FileNaming,
    header: Box<dyn HeaderProvider>,
    clock: Arc<dyn WallClock>,
    state: WriterState,
    last_armed_seen: bool,
    active: ActiveFile,
    stats: WriterStats,
}

/// Builder for [`RecordingFileWriter`]
pub struct RecordingFileWriterBuilder {
    label: String,
    naming: FileNaming,
    header: Box<dyn HeaderProvider>,
    clock: Arc<dyn WallClock>,
}

impl RecordingFileWriterBuilder {
    /// Header written at the start of each file
    pub fn header(mut self, header: impl HeaderProvider + 'static) -> Self {
        self.header = Box::new(header);
        self
    }

    /// Wall clock used to name files
    pub fn clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the writer in the `Idle` state
    pub fn build(self) -> RecordingFileWriter {
        RecordingFileWriter {
            label: self.label,
            naming: self.naming,
            header: self.header,
            clock: self.clock,
            state: WriterState::Idle,
            last_armed_seen: false,
            active: ActiveFile::default(),
            stats: WriterStats::default(),
        }
    }
}

impl RecordingFileWriter {
    /// Start building a writer for stream `label`.
    ///
    /// Defaults to a video header and the system clock.
    pub fn builder(label: impl Into<String>, naming: FileNaming) -> RecordingFileWriterBuilder {
        RecordingFileWriterBuilder {
            label: label.into(),
            naming,
            header: Box::new(FileHeader::Video),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stream label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state
    pub fn state(&self) -> &WriterState {
        &self.state
    }

    /// Armed flag of the last processed record
    pub fn last_armed_seen(&self) -> bool {
        self.last_armed_seen
    }

    /// Handle to the currently open file's path
    pub fn active_file(&self) -> ActiveFile {
        self.active.clone()
    }

    /// Counters
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Apply one record to the state machine.
    ///
    /// | armed | state     | action                                  |
    /// |-------|-----------|-----------------------------------------|
    /// | true  | Idle      | open file, write header, write record   |
    /// | true  | Recording | write record                            |
    /// | false | Recording | flush, close, make read-only            |
    /// | false | Idle      | nothing                                 |
    pub fn process(&mut self, timestamp: u64, payload: &[u8], armed: bool) -> AppResult<()> {
        if armed {
            if !self.state.is_open() {
                self.open_file()?;
            }
            if let WriterState::Recording { path, file } = &mut self.state {
                write_record(file, timestamp, payload).map_err(|source| AvError::IoWriteFailed {
                    path: path.clone(),
                    source,
                })?;
                self.stats.records_written += 1;
                self.stats.bytes_written += (RECORD_HEADER_SIZE + payload.len()) as u64;
            }
        } else if self.state.is_open() {
            self.close_file()?;
        } else {
            self.stats.records_skipped += 1;
        }

        self.last_armed_seen = armed;
        Ok(())
    }

    /// Close the open file, if any. Used on explicit stop.
    pub fn finish(&mut self) -> AppResult<()> {
        if self.state.is_open() {
            debug!(stream = %self.label, "Closing recording on stop");
            self.close_file()?;
        }
        Ok(())
    }

    fn open_file(&mut self) -> AppResult<()> {
        let path = self.naming.filename(self.clock.now());

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| AvError::IoOpenFailed {
                path: path.clone(),
                source,
            })?;
        let mut file = BufWriter::new(file);

        let header = self.header.header_bytes();
        file.write_all(&header)
            .map_err(|source| AvError::IoWriteFailed {
                path: path.clone(),
                source,
            })?;

        info!(stream = %self.label, path = %path.display(), "Recording file opened");

        self.stats.files_opened += 1;
        self.stats.bytes_written += header.len() as u64;
        self.active.set(Some(path.clone()));
        self.state = WriterState::Recording { path, file };
        Ok(())
    }

    fn close_file(&mut self) -> AppResult<()> {
        let WriterState::Recording { path, file } =
            std::mem::replace(&mut self.state, WriterState::Idle)
        else {
            return Ok(());
        };
        self.active.set(None);

        let file = file.into_inner().map_err(|e| AvError::IoWriteFailed {
            path: path.clone(),
            source: e.into_error(),
        })?;
        drop(file);

        if let Err(e) = make_read_only(&path) {
            warn!(stream = %self.label, path = %path.display(), error = %e, "Could not set file read-only");
        }

        self.stats.files_closed += 1;
        info!(
            stream = %self.label,
            path = %path.display(),
            records = self.stats.records_written,
            "Recording file closed"
        );
        Ok(())
    }

    /// Consume `buffer` until `stop` is raised, then close any open file.
    ///
    /// The buffer is polled every `poll` so a stop request is honoured even
    /// when no data arrives. A fatal error ends the loop; the open file is
    /// still closed on a best-effort basis.
    pub fn run(&mut self, buffer: &CyclicStreamBuffer, stop: &AtomicBool, poll: Duration) -> AppResult<()> {
        debug!(stream = %self.label, "Writer loop running");

        while !stop.load(Ordering::Acquire) {
            let Some(view) = buffer.get_timeout(poll)? else {
                continue;
            };
            if let Err(e) = self.process(view.timestamp(), view.payload(), view.armed()) {
                drop(view);
                if let Err(close_err) = self.finish() {
                    warn!(stream = %self.label, error = %close_err, "Close after failure also failed");
                }
                return Err(e);
            }
        }

        self.finish()
    }

    /// Move the writer onto a named thread consuming `buffer`.
    pub fn spawn(mut self, buffer: Arc<CyclicStreamBuffer>, poll: Duration) -> AppResult<StreamWorker> {
        let name = format!("writer-{}", self.label);
        StreamWorker::spawn(name, move |stop| self.run(&buffer, stop, poll))
    }
}

impl std::fmt::Debug for RecordingFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingFileWriter")
            .field("label", &self.label)
            .field("naming", &self.naming)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(unix)]
fn make_read_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o444))
}

#[cfg(not(unix))]
fn make_read_only(path: &Path) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avrec_core::clock::FixedClock;
    use chrono::NaiveDate;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn clock() -> Arc<dyn WallClock> {
        Arc::new(FixedClock(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(10, 15, 30)
                .unwrap(),
        ))
    }

    fn audio_writer(dir: &Path) -> RecordingFileWriter {
        RecordingFileWriter::builder("audio", FileNaming::audio(dir))
            .header(FileHeader::Audio {
                sample_rate: 44100,
                channels: 2,
            })
            .clock(clock())
            .build()
    }

    #[test]
    fn test_armed_sequence_produces_one_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = audio_writer(dir.path());

        let armed = [false, false, true, true, true, false];
        for (i, &flag) in armed.iter().enumerate() {
            writer.process(1000 + i as u64, &[i as u8; 4], flag).unwrap();
        }

        assert!(!writer.state().is_open());
        assert!(writer.active_file().get().is_none());
        let stats = writer.stats();
        assert_eq!(stats.files_opened, 1);
        assert_eq!(stats.files_closed, 1);
        assert_eq!(stats.records_written, 3);

        let path = dir.path().join("2024-03-01--10-15-30_audio_00.aud");
        let bytes = fs::read(&path).unwrap();

        let header = FileHeader::Audio {
            sample_rate: 44100,
            channels: 2,
        }
        .encode();
        assert_eq!(&bytes[..header.len()], header.as_slice());

        let mut expected = header;
        for i in 2..5u8 {
            write_record(&mut expected, 1000 + i as u64, &[i; 4]).unwrap();
        }
        assert_eq!(bytes, expected);

        assert!(fs::metadata(&path).unwrap().permissions().readonly());
    }

    #[test]
    fn test_active_file_tracks_rotation() {
        let dir = TempDir::new().unwrap();
        let mut writer = audio_writer(dir.path());
        let active = writer.active_file();

        writer.process(1, b"a", true).unwrap();
        assert_eq!(
            active.display_name().as_deref(),
            Some("2024-03-01--10-15-30_audio_00.aud")
        );
        assert!(writer.last_armed_seen());

        writer.finish().unwrap();
        assert!(active.get().is_none());
        assert_eq!(writer.stats().files_closed, 1);
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let mut writer = RecordingFileWriter::builder("video_00", FileNaming::video(&missing, 0))
            .clock(clock())
            .build();

        let err = writer.process(1, b"frame", true).unwrap_err();
        assert!(matches!(err, AvError::IoOpenFailed { .. }));
        assert!(err.is_fatal());
        assert!(!writer.state().is_open());
    }

    #[test]
    fn test_custom_header_provider() {
        let dir = TempDir::new().unwrap();
        let mut writer = RecordingFileWriter::builder("video_02", FileNaming::video(dir.path(), 2))
            .header(|| b"HDR".to_vec())
            .clock(clock())
            .build();

        writer.process(7, b"xy", true).unwrap();
        writer.finish().unwrap();

        let bytes = fs::read(dir.path().join("2024-03-01--10-15-30_video_02.vid")).unwrap();
        assert_eq!(&bytes[..3], b"HDR");
        assert_eq!(bytes.len(), 3 + RECORD_HEADER_SIZE + 2);
    }

    #[test]
    fn test_disarmed_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut writer = audio_writer(dir.path());
        for i in 0..3 {
            writer.process(i, b"quiet", false).unwrap();
        }
        assert_eq!(writer.stats().records_skipped, 3);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
    /// Losing the file before close only costs the read-only bit.
    #[cfg(unix)]
    #[traced_test]
    #[test]
    fn test_read_only_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut writer = audio_writer(dir.path());

        writer.process(1, b"period", true).unwrap();
        let path = writer.active_file().get().unwrap();
        fs::remove_file(&path).unwrap();

        writer.process(2, b"period", false).unwrap();
        assert!(!writer.state().is_open());
        assert_eq!(writer.stats().files_closed, 1);
        assert!(logs_contain("Could not set file read-only"));
    }

    /// Points the writer at /dev/full, where every flush fails with ENOSPC.
    #[cfg(target_os = "linux")]
    fn writer_on_full_device() -> Option<RecordingFileWriter> {
        let path = PathBuf::from("/dev/full");
        let file = OpenOptions::new().write(true).open(&path).ok()?;
        let dir = std::env::temp_dir();
        let mut writer = audio_writer(&dir);
        writer.state = WriterState::Recording {
            path,
            file: BufWriter::new(file),
        };
        Some(writer)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_record_write_failure_is_fatal() {
        let Some(mut writer) = writer_on_full_device() else {
            return;
        };

        // Larger than the BufWriter capacity, so it reaches the device
        let err = writer.process(1, &vec![0u8; 64 * 1024], true).unwrap_err();
        assert!(matches!(err, AvError::IoWriteFailed { ref path, .. } if path == Path::new("/dev/full")));
        assert!(err.is_fatal());
        assert_eq!(writer.stats().records_written, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_flush_failure_on_close_is_fatal() {
        let Some(mut writer) = writer_on_full_device() else {
            return;
        };

        writer.process(1, b"buffered", true).unwrap();
        let err = writer.finish().unwrap_err();
        assert!(matches!(err, AvError::IoWriteFailed { .. }));
        assert!(!writer.state().is_open());
        assert_eq!(writer.stats().files_closed, 0);
    }
}

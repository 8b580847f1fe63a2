//! Reading, summarizing and repairing recording files.
//!
//! A recording interrupted by a crash or power loss usually ends in a
//! partial record. [`summarize`] reports how much of a file is intact and
//! [`repair`] copies the intact prefix to a new file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use avrec_core::error::{AppResult, AvError};

use crate::file_format::{write_record, FileHeader, StreamKind, FORMAT_VERSION, RECORD_HEADER_SIZE};

/// One record as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Sequential reader over a recording file.
///
/// Iteration yields records until the end of the file. A partial trailing
/// record yields one [`AvError::InvalidFormat`] and then ends.
pub struct RecordingReader<R> {
    reader: R,
    path: PathBuf,
    header: FileHeader,
    offset: u64,
    len: u64,
    done: bool,
}

impl RecordingReader<BufReader<File>> {
    /// Open a recording and parse its header
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Self::new(BufReader::new(file), path, len)
    }
}

impl<R: Read> RecordingReader<R> {
    /// Wrap a reader positioned at the start of a recording of `len` bytes
    pub fn new(mut reader: R, path: impl Into<PathBuf>, len: u64) -> AppResult<Self> {
        let header = FileHeader::read_from(&mut reader)?;
        Ok(Self {
            reader,
            path: path.into(),
            offset: header.encoded_len() as u64,
            header,
            len,
            done: false,
        })
    }

    /// Parsed file header
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Path the reader was opened with
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset just past the last complete record read
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record. `Ok(None)` at a clean end of file.
    pub fn next_record(&mut self) -> AppResult<Option<FileRecord>> {
        if self.done {
            return Ok(None);
        }

        let remaining = self.len.saturating_sub(self.offset);
        if remaining == 0 {
            self.done = true;
            return Ok(None);
        }
        if remaining < RECORD_HEADER_SIZE as u64 {
            self.done = true;
            return Err(self.truncated(format!("{} stray bytes after last record", remaining)));
        }

        let mut prefix = [0u8; RECORD_HEADER_SIZE];
        self.reader.read_exact(&mut prefix)?;
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&prefix[..8]);
        let mut size = [0u8; 4];
        size.copy_from_slice(&prefix[8..]);
        let timestamp = u64::from_le_bytes(timestamp);
        let size = u32::from_le_bytes(size) as u64;

        if remaining - (RECORD_HEADER_SIZE as u64) < size {
            self.done = true;
            return Err(self.truncated(format!(
                "record of {} bytes cut after {} bytes",
                size,
                remaining - RECORD_HEADER_SIZE as u64
            )));
        }

        let mut payload = vec![0u8; size as usize];
        self.reader.read_exact(&mut payload)?;
        self.offset += RECORD_HEADER_SIZE as u64 + size;

        Ok(Some(FileRecord { timestamp, payload }))
    }

    fn truncated(&self, detail: String) -> AvError {
        AvError::InvalidFormat(format!(
            "{}: truncated at offset {}: {}",
            self.path.display(),
            self.offset,
            detail
        ))
    }
}

impl<R: Read> Iterator for RecordingReader<R> {
    type Item = AppResult<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Overview of a recording file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    /// File examined
    pub path: PathBuf,
    /// Parsed header
    pub header: FileHeader,
    /// Format version
    pub version: u32,
    /// Complete records
    pub records: u64,
    /// Payload bytes in complete records
    pub payload_bytes: u64,
    /// Timestamp of the first record
    pub first_timestamp: Option<u64>,
    /// Timestamp of the last complete record
    pub last_timestamp: Option<u64>,
    /// Bytes covered by the header and complete records
    pub valid_bytes: u64,
    /// Size of the file
    pub file_bytes: u64,
    /// Whether the file ends in a partial record
    pub truncated: bool,
}

impl FileSummary {
    /// Stream kind from the header
    pub fn kind(&self) -> StreamKind {
        self.header.kind()
    }

    /// Recorded span between first and last timestamp in milliseconds
    pub fn duration_ms(&self) -> u64 {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }
}

/// Scan a recording and report what it contains.
pub fn summarize(path: impl AsRef<Path>) -> AppResult<FileSummary> {
    let mut reader = RecordingReader::open(path.as_ref())?;
    let mut summary = FileSummary {
        path: path.as_ref().to_path_buf(),
        header: *reader.header(),
        version: FORMAT_VERSION,
        records: 0,
        payload_bytes: 0,
        first_timestamp: None,
        last_timestamp: None,
        valid_bytes: 0,
        file_bytes: reader.len,
        truncated: false,
    };

    loop {
        match reader.next_record() {
            Ok(Some(record)) => {
                summary.records += 1;
                summary.payload_bytes += record.payload.len() as u64;
                summary.first_timestamp.get_or_insert(record.timestamp);
                summary.last_timestamp = Some(record.timestamp);
            }
            Ok(None) => break,
            Err(AvError::InvalidFormat(detail)) => {
                debug!(%detail, "Recording ends in a partial record");
                summary.truncated = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }
    summary.valid_bytes = reader.offset();

    Ok(summary)
}

/// Outcome of [`repair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairReport {
    /// Records copied to the repaired file
    pub records_kept: u64,
    /// Bytes written to the repaired file
    pub bytes_written: u64,
    /// Bytes of the source that were left out
    pub bytes_dropped: u64,
}

/// Copy the intact prefix of `src` to `dst`.
///
/// `dst` must not be `src` under any name (relative path, symlink or hard
/// link); that is rejected with `Configuration` before anything is written.
/// Copying stops at the first partial record. Audio periods all have the
/// same size, so for audio files copying also stops at the first record
/// whose size differs from the first one.
pub fn repair(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> AppResult<RepairReport> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    let mut reader = RecordingReader::open(src)?;
    let header = *reader.header();

    if is_same_file(src, dst) {
        return Err(AvError::Configuration(format!(
            "repair destination {} is the source recording {}",
            dst.display(),
            src.display()
        )));
    }

    let out = File::create(dst).map_err(|source| AvError::IoOpenFailed {
        path: dst.to_path_buf(),
        source,
    })?;
    let mut out = BufWriter::new(out);
    let write_err = |source| AvError::IoWriteFailed {
        path: dst.to_path_buf(),
        source,
    };

    let header_bytes = header.encode();
    out.write_all(&header_bytes).map_err(write_err)?;
    let mut bytes_written = header_bytes.len() as u64;
    let mut records_kept = 0u64;
    let mut audio_period: Option<usize> = None;

    loop {
        let record = match reader.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(AvError::InvalidFormat(detail)) => {
                warn!(%detail, "Dropping partial trailing record");
                break;
            }
            Err(e) => return Err(e),
        };

        if header.kind() == StreamKind::Audio {
            let expected = *audio_period.get_or_insert(record.payload.len());
            if record.payload.len() != expected {
                warn!(
                    expected,
                    found = record.payload.len(),
                    "Audio period size changed, treating the rest as damaged"
                );
                break;
            }
        }

        write_record(&mut out, record.timestamp, &record.payload).map_err(write_err)?;
        bytes_written += (RECORD_HEADER_SIZE + record.payload.len()) as u64;
        records_kept += 1;
    }

    out.flush().map_err(write_err)?;

    let report = RepairReport {
        records_kept,
        bytes_written,
        bytes_dropped: reader.len.saturating_sub(bytes_written),
    };
    info!(
        src = %src.display(),
        dst = %dst.display(),
        records = report.records_kept,
        dropped = report.bytes_dropped,
        "Recording repaired"
    );
    Ok(report)
}

/// Whether `a` and `b` name the same existing file.
#[cfg(unix)]
fn is_same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

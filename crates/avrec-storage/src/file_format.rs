//! On-disk layout of recording files (format version 1).
//!
//! ```text
//! header:  magic (17 ASCII bytes) | version u32 LE
//!          [audio only] sample_rate u32 LE | channels u32 LE
//! record:  timestamp_ms u64 LE | payload_len u32 LE | payload
//! ```
//!
//! All integers are little-endian. There is no padding and no trailer; a
//! file ends after its last complete record.

use chrono::NaiveDateTime;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use avrec_core::error::{AppResult, AvError};

/// Magic string opening an audio recording
pub const MAGIC_AUDIO: &[u8; 17] = b"ELEKTA_AUDIO_FILE";

/// Magic string opening a video recording
pub const MAGIC_VIDEO: &[u8; 17] = b"ELEKTA_VIDEO_FILE";

/// Length of either magic string
pub const MAGIC_LEN: usize = 17;

/// File format version written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Size of the per-record prefix on disk (timestamp + payload length)
pub const RECORD_HEADER_SIZE: usize = 12;

/// Kind of stream stored in a recording file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Microphone audio, interleaved S16 LE periods
    Audio,
    /// Camera frames (opaque, typically JPEG)
    Video,
}

impl StreamKind {
    /// Magic string of this kind
    pub fn magic(self) -> &'static [u8; MAGIC_LEN] {
        match self {
            StreamKind::Audio => MAGIC_AUDIO,
            StreamKind::Video => MAGIC_VIDEO,
        }
    }

    /// Filename suffix placed after the timestamp
    pub fn suffix(self) -> &'static str {
        match self {
            StreamKind::Audio => "_audio",
            StreamKind::Video => "_video",
        }
    }

    /// Filename extension
    pub fn extension(self) -> &'static str {
        match self {
            StreamKind::Audio => "aud",
            StreamKind::Video => "vid",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Header written once at the start of each recording file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileHeader {
    /// Audio file header
    Audio {
        /// Nominal sampling rate in Hz
        sample_rate: u32,
        /// Number of interleaved channels
        channels: u32,
    },
    /// Video file header
    Video,
}

impl FileHeader {
    /// Kind of stream this header announces
    pub fn kind(&self) -> StreamKind {
        match self {
            FileHeader::Audio { .. } => StreamKind::Audio,
            FileHeader::Video => StreamKind::Video,
        }
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            FileHeader::Audio { .. } => MAGIC_LEN + 12,
            FileHeader::Video => MAGIC_LEN + 4,
        }
    }

    /// Encode the header bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(self.kind().magic());
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        if let FileHeader::Audio {
            sample_rate,
            channels,
        } = self
        {
            buf.extend_from_slice(&sample_rate.to_le_bytes());
            buf.extend_from_slice(&channels.to_le_bytes());
        }
        buf
    }

    /// Read and validate a header from the start of a recording.
    ///
    /// Fails with [`AvError::InvalidFormat`] on an unknown magic string, an
    /// unsupported version or a short read.
    pub fn read_from<R: Read>(reader: &mut R) -> AppResult<Self> {
        let mut magic = [0u8; MAGIC_LEN];
        read_exact_or_invalid(reader, &mut magic, "magic string")?;

        let kind = if &magic == MAGIC_AUDIO {
            StreamKind::Audio
        } else if &magic == MAGIC_VIDEO {
            StreamKind::Video
        } else {
            return Err(AvError::InvalidFormat(format!(
                "unknown magic string {:?}",
                String::from_utf8_lossy(&magic)
            )));
        };

        let version = read_u32(reader, "version")?;
        if version != FORMAT_VERSION {
            return Err(AvError::InvalidFormat(format!(
                "unsupported {} file version {} (expected {})",
                kind, version, FORMAT_VERSION
            )));
        }

        match kind {
            StreamKind::Audio => {
                let sample_rate = read_u32(reader, "sample rate")?;
                let channels = read_u32(reader, "channel count")?;
                Ok(FileHeader::Audio {
                    sample_rate,
                    channels,
                })
            }
            StreamKind::Video => Ok(FileHeader::Video),
        }
    }
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> AppResult<u32> {
    let mut bytes = [0u8; 4];
    read_exact_or_invalid(reader, &mut bytes, what)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_exact_or_invalid<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> AppResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            AvError::InvalidFormat(format!("file too short for header {}", what))
        }
        _ => AvError::Io(e),
    })
}

/// Source of the header bytes written when a new recording file is opened.
///
/// Implemented for [`FileHeader`] and for any `Fn() -> Vec<u8>` closure, so a
/// writer can carry custom headers without subclassing.
pub trait HeaderProvider: Send {
    /// Bytes to write at the start of a new file
    fn header_bytes(&self) -> Vec<u8>;
}

impl HeaderProvider for FileHeader {
    fn header_bytes(&self) -> Vec<u8> {
        self.encode()
    }
}

impl<F> HeaderProvider for F
where
    F: Fn() -> Vec<u8> + Send,
{
    fn header_bytes(&self) -> Vec<u8> {
        self()
    }
}

/// Write one record (timestamp, length, payload)
pub fn write_record<W: Write>(writer: &mut W, timestamp: u64, payload: &[u8]) -> std::io::Result<()> {
    writer.write_all(&timestamp.to_le_bytes())?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)
}

/// Naming scheme for the files of one stream.
///
/// Names have the form
/// `<storage>/<YYYY>-<MM>-<DD>--<hh>-<mm>-<ss><suffix>_<NN>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNaming {
    /// Directory receiving the recordings
    pub storage_path: PathBuf,
    /// Suffix after the timestamp (`_audio`, `_video`)
    pub suffix: String,
    /// Extension without the dot
    pub extension: String,
    /// Stream index, zero-padded to two digits
    pub index: u32,
}

impl FileNaming {
    /// Naming for the audio stream
    pub fn audio(storage_path: impl Into<PathBuf>) -> Self {
        Self::for_kind(storage_path, StreamKind::Audio, 0)
    }

    /// Naming for a camera, indexed by camera id
    pub fn video(storage_path: impl Into<PathBuf>, camera: u32) -> Self {
        Self::for_kind(storage_path, StreamKind::Video, camera)
    }

    fn for_kind(storage_path: impl Into<PathBuf>, kind: StreamKind, index: u32) -> Self {
        Self {
            storage_path: storage_path.into(),
            suffix: kind.suffix().to_string(),
            extension: kind.extension().to_string(),
            index,
        }
    }

    /// File name for a recording started at `at` (local wall time)
    pub fn filename(&self, at: NaiveDateTime) -> PathBuf {
        self.storage_path.join(format!(
            "{}{}_{:02}.{}",
            at.format("%Y-%m-%d--%H-%M-%S"),
            self.suffix,
            self.index,
            self.extension
        ))
    }

    /// Directory receiving the recordings
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 15, 30)
            .unwrap()
    }

    #[test]
    fn test_audio_header_layout() {
        let header = FileHeader::Audio {
            sample_rate: 44100,
            channels: 2,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), 29);
        assert_eq!(&bytes[..17], b"ELEKTA_AUDIO_FILE");
        assert_eq!(&bytes[17..21], &1u32.to_le_bytes());
        assert_eq!(&bytes[21..25], &44100u32.to_le_bytes());
        assert_eq!(&bytes[25..29], &2u32.to_le_bytes());
    }

    #[test]
    fn test_video_header_layout() {
        let bytes = FileHeader::Video.encode();
        assert_eq!(bytes.len(), 21);
        assert_eq!(&bytes[..17], b"ELEKTA_VIDEO_FILE");
        assert_eq!(&bytes[17..], &1u32.to_le_bytes());
    }

    #[test]
    fn test_header_read_back() {
        let header = FileHeader::Audio {
            sample_rate: 48000,
            channels: 1,
        };
        let bytes = header.encode();
        let decoded = FileHeader::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_bad_input() {
        let err = FileHeader::read_from(&mut &b"NOT_A_RECORDING__\x01\0\0\0"[..]).unwrap_err();
        assert!(matches!(err, AvError::InvalidFormat(_)));

        let mut bytes = FileHeader::Video.encode();
        bytes[17] = 2;
        let err = FileHeader::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(err.to_string().contains("unsupported video file version 2"));

        let err = FileHeader::read_from(&mut &b"ELEKTA_AUDIO_FILE\x01\0"[..]).unwrap_err();
        assert!(matches!(err, AvError::InvalidFormat(_)));
    }

    #[test]
    fn test_record_layout() {
        let mut out = Vec::new();
        write_record(&mut out, 0x0102_0304_0506_0708, b"abc").unwrap();
        assert_eq!(out.len(), RECORD_HEADER_SIZE + 3);
        assert_eq!(&out[..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&out[8..12], &3u32.to_le_bytes());
        assert_eq!(&out[12..], b"abc");
    }

    #[test]
    fn test_filenames() {
        assert_eq!(
            FileNaming::audio("/videodat").filename(at()),
            PathBuf::from("/videodat/2024-03-01--10-15-30_audio_00.aud")
        );
        assert_eq!(
            FileNaming::video("/videodat", 3).filename(at()),
            PathBuf::from("/videodat/2024-03-01--10-15-30_video_03.vid")
        );
    }

    #[test]
    fn test_closure_header_provider() {
        let provider = || b"CUSTOM".to_vec();
        assert_eq!(provider.header_bytes(), b"CUSTOM".to_vec());
        assert_eq!(FileHeader::Video.header_bytes(), FileHeader::Video.encode());
    }
}

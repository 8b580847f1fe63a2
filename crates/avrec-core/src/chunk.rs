//! Chunk records and their in-buffer framing.
//!
//! Every record stored in a cyclic stream buffer is a fixed-size header
//! followed by the payload bytes:
//!
//! ```text
//! +----------------+---------------+-------+-----------+------------------+
//! | timestamp (8)  | payload_len(4)| armed | reserved  | payload ...      |
//! |   u64 LE       |   u32 LE      |  (1)  |   (3)     |                  |
//! +----------------+---------------+-------+-----------+------------------+
//! ```
//!
//! This layout is internal to the buffer. The on-disk record layout written by
//! the recording file writer is different (see `avrec_storage::file_format`).

use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the in-buffer record header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Metadata stored in front of each payload inside a stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// Armed flag stamped by the buffer at insertion time.
    pub armed: bool,
}

impl ChunkHeader {
    /// Encode into the fixed header layout.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        out[12] = u8::from(self.armed);
        out
    }

    /// Decode from the fixed header layout.
    #[must_use]
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[0..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[8..12]);
        Self {
            timestamp: u64::from_le_bytes(ts),
            payload_len: u32::from_le_bytes(len),
            armed: bytes[12] != 0,
        }
    }

    /// Header plus payload size.
    #[must_use]
    pub fn framed_len(&self) -> usize {
        framed_len(self.payload_len as usize)
    }
}

/// Header plus payload size for a payload of `payload_len` bytes.
#[must_use]
pub fn framed_len(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len
}

/// An owned chunk record.
///
/// Produced when a consumer needs to keep a record past the lifetime of a
/// borrowed buffer view, e.g. to hand it to another thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Opaque payload bytes (one video frame or one audio period).
    pub payload: Vec<u8>,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Whether the stream was armed for recording when the chunk was inserted.
    pub armed: bool,
}

impl ChunkRecord {
    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Producers call this right after a capture completes.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

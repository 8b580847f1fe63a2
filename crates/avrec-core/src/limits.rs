//! Shared hard limits and sizing rules for stream buffers.
//!
//! This module centralizes:
//! - Default buffer capacities and safety margins
//! - Timing thresholds for observers and consumer polling
//! - The validation rule tying the safety margin to the maximum chunk size
//!
//! The overflow check of a cyclic buffer is a capacity-planning contract, not
//! a recovery mechanism: size the buffer so that the worst-case backlog of the
//! primary consumer stays below `capacity * (1 - safety_margin)`.

use crate::error::AvError;
use std::time::Duration;

// =============================================================================
// Sizing Defaults
// =============================================================================

/// Default capacity of a video stream buffer (100 MiB).
pub const DEFAULT_VIDEO_BUFFER_BYTES: usize = 100 * 1024 * 1024;

/// Default capacity of the audio stream buffer (4 MiB).
pub const DEFAULT_AUDIO_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Fraction of capacity kept free to absorb producer/consumer races.
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.2;

/// Maximum framed chunk size as a fraction of capacity.
pub const DEFAULT_MAX_CHUNK_FRACTION: f64 = 0.02;

/// The safety margin must cover at least this many maximum-size chunks.
pub const MIN_MARGIN_CHUNKS: f64 = 4.0;

// =============================================================================
// Timing
// =============================================================================

/// Observers slower than this are reported, since they throttle acquisition.
pub const SLOW_OBSERVER_THRESHOLD: Duration = Duration::from_millis(1);

/// How long a primary consumer waits for data before re-checking its stop flag.
pub const DEFAULT_CONSUMER_POLL: Duration = Duration::from_millis(100);

// =============================================================================
// Audio
// =============================================================================

/// Bytes per audio sample (signed 16-bit little-endian PCM).
pub const AUDIO_BYTES_PER_SAMPLE: usize = 2;

/// Number of audio periods the level meter keeps peak values for.
pub const LEVEL_HISTORY_PERIODS: usize = 5;

/// Validated sizing of a cyclic stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    /// Logical capacity in bytes.
    pub capacity: usize,
    /// Largest framed record (header + payload) accepted by `insert`.
    pub max_chunk: usize,
    /// Occupancy at or above which `insert` reports an overflow.
    pub overflow_limit: usize,
}

/// Validate buffer parameters and derive the chunk and overflow limits.
///
/// Rejects margins outside `[0, 1)`, non-positive chunk fractions, margins
/// smaller than [`MIN_MARGIN_CHUNKS`] maximum chunks, and capacities too small
/// to hold a single chunk header.
pub fn validate_buffer_sizing(
    capacity: usize,
    safety_margin: f64,
    max_chunk_fraction: f64,
    header_size: usize,
) -> Result<BufferSizing, AvError> {
    if !(0.0..1.0).contains(&safety_margin) {
        return Err(AvError::Configuration(format!(
            "safety_margin {} must be in [0, 1)",
            safety_margin
        )));
    }

    if !(max_chunk_fraction > 0.0 && max_chunk_fraction < 1.0) {
        return Err(AvError::Configuration(format!(
            "max_chunk_fraction {} must be in (0, 1)",
            max_chunk_fraction
        )));
    }

    if safety_margin < MIN_MARGIN_CHUNKS * max_chunk_fraction {
        return Err(AvError::Configuration(format!(
            "safety_margin {} must be at least {} times max_chunk_fraction {}",
            safety_margin, MIN_MARGIN_CHUNKS, max_chunk_fraction
        )));
    }

    let max_chunk = (capacity as f64 * max_chunk_fraction).floor() as usize;
    if max_chunk <= header_size {
        return Err(AvError::Configuration(format!(
            "capacity {} bytes is too small: maximum chunk of {} bytes cannot hold a {}-byte header",
            capacity, max_chunk, header_size
        )));
    }

    let overflow_limit = (capacity as f64 * (1.0 - safety_margin)).floor() as usize;

    Ok(BufferSizing {
        capacity,
        max_chunk,
        overflow_limit,
    })
}

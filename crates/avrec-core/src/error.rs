//! Error types for the streaming core.
//!
//! `AvError` separates the conditions the recording path treats as fatal
//! (a sizing bug or an unusable output location) from ordinary I/O and
//! configuration failures. Library code never terminates the process; the
//! stream harness decides whether a fatal error stops a stream or the whole
//! application.
//!
//! ## Fatal for the affected stream
//!
//! - **`Overflow`**: a cyclic buffer crossed its safety-margin threshold.
//!   Indicates that the consumer cannot keep up with the producer for the
//!   configured capacity.
//! - **`OversizeChunk`**: a single record is larger than the maximum chunk
//!   size derived from the buffer capacity.
//! - **`IoOpenFailed`** / **`IoWriteFailed`**: the recording file could not be
//!   created or written.
//! - **`WorkerPanicked`**: a stream thread died without returning.
//!
//! ## Everything else
//!
//! - **`ConsumerBusy`**: a second `get()` while the previous chunk is held.
//! - **`Config`** / **`Configuration`**: loading or semantic validation of the
//!   configuration failed.
//! - **`InvalidFormat`**: a recording file on disk does not follow the
//!   expected layout.
//! - **`Io`**: any other I/O failure.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the core error type.
pub type AppResult<T> = std::result::Result<T, AvError>;

/// Primary error type for avrec.
#[derive(Error, Debug)]
pub enum AvError {
    /// Buffer occupancy reached the safety-margin threshold on insert.
    ///
    /// **Error Type**: Permanent - the buffer is too small for the data rate.
    ///
    /// **Recovery Strategy**: Stop the stream, increase the buffer capacity or
    /// investigate why the primary consumer stalled.
    #[error("Stream '{stream}' cyclic buffer overflow: {occupied} bytes queued, limit {limit} bytes")]
    Overflow {
        /// Stream label of the overflowing buffer.
        stream: String,
        /// Bytes queued when the insert was attempted.
        occupied: usize,
        /// Occupancy threshold derived from capacity and safety margin.
        limit: usize,
    },

    /// A single framed record exceeds the maximum chunk size.
    #[error("Stream '{stream}' chunk too large: {framed} framed bytes exceed maximum {max} bytes")]
    OversizeChunk {
        /// Stream label of the rejecting buffer.
        stream: String,
        /// Header plus payload size of the rejected record.
        framed: usize,
        /// Maximum framed chunk size for this buffer.
        max: usize,
    },

    /// A recording file could not be opened for writing.
    #[error("Cannot open recording file {path:?}: {source}")]
    IoOpenFailed {
        /// File that was being opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing to (or flushing) a recording file failed.
    #[error("Cannot write recording file {path:?}: {source}")]
    IoWriteFailed {
        /// File that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The primary consumer of a stream buffer already holds a chunk.
    ///
    /// A buffer has exactly one primary consumer; the previous chunk view
    /// must be dropped before the next `get()`.
    #[error("Stream '{stream}' primary consumer is busy: previous chunk not released")]
    ConsumerBusy {
        /// Stream label of the buffer.
        stream: String,
    },

    /// A stream worker thread panicked.
    #[error("Worker thread '{0}' panicked")]
    WorkerPanicked(String),

    /// Configuration file parsing failed.
    ///
    /// **Source**: Wraps `figment::Error`. Boxed to keep `AvError` small.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration validation failed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use avrec_core::error::AvError;
    ///
    /// fn validate_margin(margin: f64) -> Result<(), AvError> {
    ///     if !(0.0..1.0).contains(&margin) {
    ///         return Err(AvError::Configuration(
    ///             "safety_margin must be in [0, 1)".into()
    ///         ));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A recording file does not follow the expected on-disk layout.
    #[error("Invalid recording file: {0}")]
    InvalidFormat(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for AvError {
    fn from(err: figment::Error) -> Self {
        AvError::Config(Box::new(err))
    }
}

impl AvError {
    /// Whether this error must terminate the stream that produced it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AvError::Overflow { .. }
                | AvError::OversizeChunk { .. }
                | AvError::IoOpenFailed { .. }
                | AvError::IoWriteFailed { .. }
                | AvError::WorkerPanicked(_)
        )
    }
}

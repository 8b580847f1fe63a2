//! `avrec-core`
//!
//! Core types shared by the avrec recording station: chunk records and their
//! framing, the observer contract for secondary consumers, the error type,
//! sizing limits, configuration and logging setup.
//!
//! ## Key Types
//!
//! - [`ChunkRecord`] / [`ChunkHeader`]: one framed unit of streamed data
//!   (a video frame or an audio period) with its capture timestamp and armed flag
//! - [`ChunkObserver`]: synchronous, non-blocking secondary consumer
//! - [`AvError`]: typed errors separating fatal stream conditions from the rest
//! - [`AvrecConfig`]: configuration built once and passed into constructors

pub mod chunk;
pub mod clock;
pub mod config;
pub mod error;
pub mod limits;
pub mod logging;
pub mod observer;

pub use chunk::{framed_len, now_millis, ChunkHeader, ChunkRecord, HEADER_SIZE};
pub use clock::{FixedClock, SystemClock, WallClock};
pub use config::{AvrecConfig, StreamBufferConfig};
pub use error::{AppResult, AvError};
pub use observer::{ChunkObserver, ObservedChunk, ObserverHandle};

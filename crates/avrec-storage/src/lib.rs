//! # avrec-storage
//!
//! Streaming buffers and recording files for the avrec recording station.
//!
//! ## Data path
//!
//! ```text
//! acquisition thread ──insert──▶ CyclicStreamBuffer ──get──▶ RecordingFileWriter ──▶ *.aud / *.vid
//!                                      │
//!                                      ├── observers (LevelMeter, FeedbackForwarder, ...)
//!                                      │        └──push──▶ OverwriteRingBuffer ──pop──▶ speaker
//!                                      └── taps (bounded channels, every Nth chunk)
//! ```
//!
//! ## Modules
//!
//! - [`cyclic_buffer`]: bounded byte ring of framed, timestamped records
//! - [`overwrite_ring`]: fixed-slot ring for feedback audio, never blocks
//! - [`file_writer`]: armed-flag driven file rotation
//! - [`file_format`]: on-disk header and record layout, file naming
//! - [`reader`]: reading, summarizing and repairing recordings
//! - [`session`]: all streams of one acquisition run
//! - [`worker`]: named stoppable threads
//! - [`observers`]: level meter and feedback forwarder
//! - [`tap_registry`]: best-effort secondary consumers

pub mod cyclic_buffer;
pub mod file_format;
pub mod file_writer;
pub mod observers;
pub mod overwrite_ring;
pub mod reader;
pub mod session;
pub mod tap_registry;
pub mod worker;

pub use cyclic_buffer::{BufferStats, ChunkView, CyclicStreamBuffer};
pub use file_format::{FileHeader, FileNaming, HeaderProvider, StreamKind};
pub use file_writer::{ActiveFile, RecordingFileWriter, WriterState, WriterStats};
pub use observers::{FeedbackForwarder, LevelMeter};
pub use overwrite_ring::{OverwriteRingBuffer, PopOutcome, RingStats};
pub use reader::{repair, summarize, FileRecord, FileSummary, RecordingReader, RepairReport};
pub use session::RecordingSession;
pub use tap_registry::{TapFilter, TapInfo, TapRegistry, TappedChunk};
pub use worker::StreamWorker;

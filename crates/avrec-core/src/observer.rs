//! Secondary observers of a stream buffer.
//!
//! Observers are notified synchronously from the producer thread, right after
//! a record has been written into a cyclic stream buffer and made visible to
//! the primary consumer. They do not affect buffer occupancy.

/// Borrowed view of a freshly inserted chunk, handed to observers.
///
/// The payload points into the buffer's storage and is only valid for the
/// duration of the `on_chunk` call.
#[derive(Debug, Clone, Copy)]
pub struct ObservedChunk<'a> {
    /// Payload bytes as stored in the buffer.
    pub payload: &'a [u8],
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Armed flag stamped on the record.
    pub armed: bool,
}

/// Opaque handle identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

impl ObserverHandle {
    /// Create a new observer handle with the given ID.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the internal ID (for debugging/logging).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Trait for synchronous chunk observers (preview, level meters, feedback).
///
/// # Contract
///
/// - `on_chunk()` MUST NOT block
/// - `on_chunk()` MUST complete quickly (< 1ms); slower observers are logged
///   because they throttle the acquisition thread
/// - To keep data, implementations MUST copy it
///
/// # Deadlock Warning
///
/// **NEVER call `unsubscribe()` on the same buffer from within `on_chunk()`!**
/// The producer holds the observer list's read lock while iterating.
///
/// # Example
///
/// ```rust
/// use avrec_core::observer::{ChunkObserver, ObservedChunk};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// struct ByteCounter {
///     bytes: AtomicU64,
/// }
///
/// impl ChunkObserver for ByteCounter {
///     fn on_chunk(&self, chunk: &ObservedChunk<'_>) {
///         self.bytes.fetch_add(chunk.payload.len() as u64, Ordering::Relaxed);
///     }
///
///     fn name(&self) -> &'static str {
///         "byte_counter"
///     }
/// }
/// ```
pub trait ChunkObserver: Send + Sync {
    /// Called synchronously for each inserted chunk.
    fn on_chunk(&self, chunk: &ObservedChunk<'_>);

    /// Descriptive name used in log messages.
    fn name(&self) -> &'static str {
        "unnamed_observer"
    }
}

impl<F> ChunkObserver for F
where
    F: Fn(&ObservedChunk<'_>) + Send + Sync,
{
    fn on_chunk(&self, chunk: &ObservedChunk<'_>) {
        self(chunk)
    }

    fn name(&self) -> &'static str {
        "closure_observer"
    }
}

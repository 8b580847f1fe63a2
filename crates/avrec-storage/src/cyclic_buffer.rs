#![allow(unsafe_code)]
//! Cyclic stream buffer: one producer, one primary consumer, any number of
//! synchronous observers.
//!
//! Each stream (a camera or the microphone) owns one buffer. The acquisition
//! thread inserts framed records; the file writer consumes them in insertion
//! order. Observers see every record on the producer thread right after it is
//! published, before `insert` returns.
//!
//! # Layout
//!
//! Records are stored contiguously as `[header | payload]`. A record never
//! straddles the wrap point: the storage is over-allocated by twice the
//! maximum chunk size, so a record that starts below `capacity` always fits
//! even if it runs past it. Once the write position reaches or passes
//! `capacity`, the next record starts at offset 0.
//!
//! # Overflow
//!
//! Inserting while the queued byte count has reached
//! `capacity * (1 - safety_margin)` fails with [`AvError::Overflow`]. The
//! margin is at least four maximum chunks, which keeps the producer's write
//! region clear of every record the consumer has not released yet.
//!
//! # Thread Safety
//!
//! - **Writes**: Serialized via an internal mutex. The mutex stays held while
//!   observers run, so the published region cannot be rewritten under them.
//! - **Reads**: One primary consumer. The returned [`ChunkView`] borrows the
//!   record in place and keeps its bytes counted as occupied until dropped.
//! - **Taps**: Owned copies through bounded channels, dropped on backpressure.

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use avrec_core::chunk::{framed_len, ChunkHeader, ChunkRecord, HEADER_SIZE};
use avrec_core::config::StreamBufferConfig;
use avrec_core::error::{AppResult, AvError};
use avrec_core::limits::{BufferSizing, SLOW_OBSERVER_THRESHOLD};
use avrec_core::observer::{ChunkObserver, ObservedChunk, ObserverHandle};

use crate::tap_registry::{TapFilter, TapInfo, TapRegistry, TappedChunk};

struct ProducerState {
    write_pos: usize,
}

struct ConsumerState {
    read_pos: usize,
}

/// Point-in-time statistics of a [`CyclicStreamBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    /// Stream label
    pub label: String,
    /// Nominal capacity in bytes
    pub capacity: usize,
    /// Bytes queued or held by the primary consumer
    pub occupied: usize,
    /// Records inserted since creation
    pub inserted_chunks: u64,
    /// Payload bytes inserted since creation
    pub inserted_bytes: u64,
    /// Records released by the primary consumer
    pub consumed_chunks: u64,
    /// Registered observers
    pub observer_count: usize,
    /// Registered taps
    pub tap_count: usize,
    /// Records lost to full tap mailboxes
    pub tap_dropped: u64,
}

/// Byte buffer carrying timestamped chunks from a producer to a consumer.
pub struct CyclicStreamBuffer {
    label: String,
    sizing: BufferSizing,

    /// capacity + 2 * max_chunk bytes, written only under `producer`
    storage: Box<[UnsafeCell<u8>]>,

    producer: Mutex<ProducerState>,
    consumer: Mutex<ConsumerState>,

    /// Bytes published and not yet released by the consumer
    occupied: Mutex<usize>,
    data_ready: Condvar,

    armed: AtomicBool,

    observers: RwLock<Vec<(ObserverHandle, Arc<dyn ChunkObserver>)>>,
    next_observer_id: AtomicU64,

    taps: TapRegistry,

    inserted_chunks: AtomicU64,
    inserted_bytes: AtomicU64,
    consumed_chunks: AtomicU64,
}

// SAFETY: `storage` is only written by the producer while holding the
// `producer` mutex, and only at offsets the occupancy accounting proves free.
// The consumer reads a record only after its bytes were published through the
// `occupied` mutex, which orders the producer's writes before the read.
unsafe impl Sync for CyclicStreamBuffer {}

impl CyclicStreamBuffer {
    /// Create a buffer for one stream.
    ///
    /// Fails with [`AvError::Configuration`] if the capacity, safety margin or
    /// maximum chunk fraction are inconsistent.
    pub fn new(config: &StreamBufferConfig) -> AppResult<Self> {
        let sizing = config.sizing()?;
        let total = sizing.capacity + 2 * sizing.max_chunk;
        let storage: Box<[UnsafeCell<u8>]> = (0..total).map(|_| UnsafeCell::new(0u8)).collect();

        debug!(
            stream = %config.label,
            capacity = sizing.capacity,
            max_chunk = sizing.max_chunk,
            overflow_limit = sizing.overflow_limit,
            "Created cyclic stream buffer"
        );

        Ok(Self {
            label: config.label.clone(),
            sizing,
            storage,
            producer: Mutex::new(ProducerState { write_pos: 0 }),
            consumer: Mutex::new(ConsumerState { read_pos: 0 }),
            occupied: Mutex::new(0),
            data_ready: Condvar::new(),
            armed: AtomicBool::new(false),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            taps: TapRegistry::new(),
            inserted_chunks: AtomicU64::new(0),
            inserted_bytes: AtomicU64::new(0),
            consumed_chunks: AtomicU64::new(0),
        })
    }

    /// Stream label used in logs and errors
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Derived sizing (capacity, maximum chunk, overflow threshold)
    pub fn sizing(&self) -> BufferSizing {
        self.sizing
    }

    /// Nominal capacity in bytes
    pub fn capacity(&self) -> usize {
        self.sizing.capacity
    }

    /// Largest framed record (header plus payload) accepted by `insert`
    pub fn max_chunk(&self) -> usize {
        self.sizing.max_chunk
    }

    /// Largest payload accepted by `insert`
    pub fn max_payload(&self) -> usize {
        self.sizing.max_chunk - HEADER_SIZE
    }

    fn data_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    /// Append a record and notify observers.
    ///
    /// The armed flag in effect at this moment is stamped into the record.
    /// Observers run synchronously on the calling thread after the record is
    /// visible to the consumer.
    ///
    /// # Errors
    ///
    /// - [`AvError::OversizeChunk`] if header plus payload exceeds the maximum
    ///   chunk size
    /// - [`AvError::Overflow`] if queued bytes reached the safety threshold
    ///
    /// Both are fatal for the stream; nothing is written in either case.
    pub fn insert(&self, payload: &[u8], timestamp: u64) -> AppResult<()> {
        let framed = framed_len(payload.len());
        if framed > self.sizing.max_chunk {
            error!(
                stream = %self.label,
                framed,
                max = self.sizing.max_chunk,
                "Chunk exceeds maximum size"
            );
            return Err(AvError::OversizeChunk {
                stream: self.label.clone(),
                framed,
                max: self.sizing.max_chunk,
            });
        }

        let mut producer = self.producer.lock();

        let occupied = *self.occupied.lock();
        if occupied >= self.sizing.overflow_limit {
            error!(
                stream = %self.label,
                occupied,
                limit = self.sizing.overflow_limit,
                "Cyclic buffer overflow"
            );
            return Err(AvError::Overflow {
                stream: self.label.clone(),
                occupied,
                limit: self.sizing.overflow_limit,
            });
        }

        let armed = self.armed.load(Ordering::Acquire);
        let header = ChunkHeader {
            timestamp,
            payload_len: payload.len() as u32,
            armed,
        }
        .encode();

        let start = producer.write_pos;
        debug_assert!(start < self.sizing.capacity);
        debug_assert!(start + framed <= self.storage.len());

        // SAFETY: start < capacity and framed <= max_chunk, so the record ends
        // before capacity + 2 * max_chunk. With occupancy below the overflow
        // limit the region [start, start + framed) holds no unreleased record.
        // `payload` is caller memory and cannot overlap `storage`.
        unsafe {
            let dst = self.data_ptr().add(start);
            std::ptr::copy_nonoverlapping(header.as_ptr(), dst, HEADER_SIZE);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), dst.add(HEADER_SIZE), payload.len());
        }

        let mut next = start + framed;
        if next >= self.sizing.capacity {
            next = 0;
        }
        producer.write_pos = next;

        {
            let mut occupied = self.occupied.lock();
            *occupied += framed;
        }
        self.data_ready.notify_one();

        self.inserted_chunks.fetch_add(1, Ordering::Relaxed);
        self.inserted_bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        // SAFETY: the record was fully written above and the producer lock is
        // still held, so nothing rewrites it while observers read it. The
        // consumer only reads.
        let published = unsafe {
            std::slice::from_raw_parts(self.data_ptr().add(start + HEADER_SIZE), payload.len())
        };
        let chunk = ObservedChunk {
            payload: published,
            timestamp,
            armed,
        };
        self.notify_observers(&chunk);
        self.taps.notify_all(&chunk);

        drop(producer);
        Ok(())
    }

    fn notify_observers(&self, chunk: &ObservedChunk<'_>) {
        let observers = self.observers.read();
        for (handle, observer) in observers.iter() {
            let started = Instant::now();
            observer.on_chunk(chunk);
            let elapsed = started.elapsed();
            if elapsed > SLOW_OBSERVER_THRESHOLD {
                warn!(
                    stream = %self.label,
                    observer = observer.name(),
                    handle = handle.id(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "Observer exceeded its time budget"
                );
            }
        }
    }

    /// Block until a record is available and return a view of it.
    ///
    /// The view stays valid until it is dropped; dropping it releases the
    /// record's bytes back to the producer.
    ///
    /// # Errors
    ///
    /// [`AvError::ConsumerBusy`] if a previous view is still alive.
    pub fn get(&self) -> AppResult<ChunkView<'_>> {
        let consumer = self.claim_consumer()?;
        let mut occupied = self.occupied.lock();
        while *occupied == 0 {
            self.data_ready.wait(&mut occupied);
        }
        drop(occupied);
        Ok(self.read_record(consumer))
    }

    /// Like [`get`](Self::get), but gives up after `timeout`.
    ///
    /// Returns `Ok(None)` when no record arrived in time, which lets consumer
    /// loops check their stop flag.
    pub fn get_timeout(&self, timeout: Duration) -> AppResult<Option<ChunkView<'_>>> {
        let consumer = self.claim_consumer()?;
        let deadline = Instant::now() + timeout;
        let mut occupied = self.occupied.lock();
        while *occupied == 0 {
            if self.data_ready.wait_until(&mut occupied, deadline).timed_out() && *occupied == 0 {
                return Ok(None);
            }
        }
        drop(occupied);
        Ok(Some(self.read_record(consumer)))
    }

    /// Non-blocking variant of [`get`](Self::get).
    pub fn try_get(&self) -> AppResult<Option<ChunkView<'_>>> {
        let consumer = self.claim_consumer()?;
        if *self.occupied.lock() == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_record(consumer)))
    }

    fn claim_consumer(&self) -> AppResult<MutexGuard<'_, ConsumerState>> {
        self.consumer.try_lock().ok_or_else(|| AvError::ConsumerBusy {
            stream: self.label.clone(),
        })
    }

    fn read_record<'a>(&'a self, mut consumer: MutexGuard<'a, ConsumerState>) -> ChunkView<'a> {
        let start = consumer.read_pos;
        let mut raw = [0u8; HEADER_SIZE];

        // SAFETY: occupancy is non-zero, so a complete record was published at
        // read_pos and its bytes stay reserved until the view is dropped.
        unsafe {
            std::ptr::copy_nonoverlapping(self.data_ptr().add(start), raw.as_mut_ptr(), HEADER_SIZE);
        }
        let header = ChunkHeader::decode(&raw);
        let framed = header.framed_len();
        debug_assert!(framed <= self.sizing.max_chunk);

        // SAFETY: as above; the payload follows the header contiguously.
        let payload = unsafe {
            std::slice::from_raw_parts(
                self.data_ptr().add(start + HEADER_SIZE),
                header.payload_len as usize,
            )
        };

        let mut next = start + framed;
        if next >= self.sizing.capacity {
            next = 0;
        }
        consumer.read_pos = next;

        ChunkView {
            buffer: self,
            _consumer: consumer,
            payload,
            header,
        }
    }

    fn release(&self, framed: usize) {
        {
            let mut occupied = self.occupied.lock();
            *occupied -= framed;
        }
        self.consumed_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the armed flag stamped into subsequently inserted records.
    pub fn set_armed(&self, armed: bool) {
        let previous = self.armed.swap(armed, Ordering::AcqRel);
        if previous != armed {
            info!(stream = %self.label, armed, "Armed flag changed");
        }
    }

    /// Current armed flag
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Bytes queued or held by the primary consumer
    pub fn occupied(&self) -> usize {
        *self.occupied.lock()
    }

    /// Register a synchronous observer.
    ///
    /// Observers run on the producer thread and must return quickly; calls
    /// slower than 1 ms are logged. Registering from inside an observer
    /// callback deadlocks.
    pub fn subscribe(&self, observer: Arc<dyn ChunkObserver>) -> ObserverHandle {
        let handle = ObserverHandle::new(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            stream = %self.label,
            observer = observer.name(),
            handle = handle.id(),
            "Observer subscribed"
        );
        self.observers.write().push((handle, observer));
        handle
    }

    /// Remove an observer. Returns false if the handle is unknown.
    pub fn unsubscribe(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(h, _)| *h != handle);
        observers.len() != before
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Register a tap receiving an owned copy of every Nth record.
    ///
    /// Taps never block the producer: a full mailbox drops the record.
    pub fn register_tap(
        &self,
        id: String,
        nth_chunk: usize,
    ) -> AppResult<mpsc::Receiver<TappedChunk>> {
        self.register_tap_filtered(id, TapFilter::every(nth_chunk))
    }

    /// Register a tap with an explicit [`TapFilter`].
    pub fn register_tap_filtered(
        &self,
        id: String,
        filter: TapFilter,
    ) -> AppResult<mpsc::Receiver<TappedChunk>> {
        let rx = self.taps.register(id.clone(), filter)?;
        debug!(
            stream = %self.label,
            tap = %id,
            nth_chunk = filter.nth_chunk,
            armed_only = filter.armed_only,
            "Tap registered"
        );
        Ok(rx)
    }

    /// Unregister a tap. Returns false if no tap had that id.
    pub fn unregister_tap(&self, id: &str) -> bool {
        self.taps.unregister(id)
    }

    /// Number of registered taps
    pub fn tap_count(&self) -> usize {
        self.taps.count()
    }

    /// Every registered tap with its delivery counters, sorted by id
    pub fn list_taps(&self) -> Vec<TapInfo> {
        self.taps.list()
    }

    /// Snapshot of counters and occupancy
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            label: self.label.clone(),
            capacity: self.sizing.capacity,
            occupied: self.occupied(),
            inserted_chunks: self.inserted_chunks.load(Ordering::Relaxed),
            inserted_bytes: self.inserted_bytes.load(Ordering::Relaxed),
            consumed_chunks: self.consumed_chunks.load(Ordering::Relaxed),
            observer_count: self.observer_count(),
            tap_count: self.tap_count(),
            tap_dropped: self.taps.dropped_total(),
        }
    }
}

impl std::fmt::Debug for CyclicStreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CyclicStreamBuffer")
            .field("label", &self.label)
            .field("capacity", &self.sizing.capacity)
            .field("max_chunk", &self.sizing.max_chunk)
            .field("occupied", &self.occupied())
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// A record borrowed from a [`CyclicStreamBuffer`] by its primary consumer.
///
/// Dropping the view releases the record. While a view is alive, further
/// `get` calls on the same buffer fail with [`AvError::ConsumerBusy`].
pub struct ChunkView<'a> {
    buffer: &'a CyclicStreamBuffer,
    _consumer: MutexGuard<'a, ConsumerState>,
    payload: &'a [u8],
    header: ChunkHeader,
}

impl<'a> ChunkView<'a> {
    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    /// Capture time in milliseconds since the Unix epoch
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Armed flag in effect when the record was inserted
    pub fn armed(&self) -> bool {
        self.header.armed
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for an empty payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Copy the record out of the buffer
    pub fn to_record(&self) -> ChunkRecord {
        ChunkRecord {
            payload: self.payload.to_vec(),
            timestamp: self.header.timestamp,
            armed: self.header.armed,
        }
    }
}

impl Drop for ChunkView<'_> {
    fn drop(&mut self) {
        self.buffer.release(self.header.framed_len());
    }
}

impl std::fmt::Debug for ChunkView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkView")
            .field("stream", &self.buffer.label)
            .field("timestamp", &self.header.timestamp)
            .field("armed", &self.header.armed)
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tracing_test::traced_test;

    fn small_buffer() -> CyclicStreamBuffer {
        // max_chunk = 1000, overflow limit = 5000
        let config = StreamBufferConfig::new("test", 10_000)
            .with_safety_margin(0.5)
            .with_max_chunk_fraction(0.1);
        CyclicStreamBuffer::new(&config).unwrap()
    }

    #[test]
    fn test_create_buffer() {
        let buffer = small_buffer();
        assert_eq!(buffer.capacity(), 10_000);
        assert_eq!(buffer.max_chunk(), 1000);
        assert_eq!(buffer.max_payload(), 1000 - HEADER_SIZE);
        assert_eq!(buffer.occupied(), 0);
        assert!(!buffer.is_armed());
    }

    #[test]
    fn test_insert_and_get() {
        let buffer = small_buffer();
        buffer.insert(b"Hello, World!", 1234).unwrap();

        let view = buffer.get().unwrap();
        assert_eq!(view.payload(), b"Hello, World!");
        assert_eq!(view.timestamp(), 1234);
        assert!(!view.armed());
        assert_eq!(buffer.occupied(), framed_len(13));
        drop(view);

        assert_eq!(buffer.occupied(), 0);
    }

    #[test]
    fn test_armed_flag_is_stamped_at_insert() {
        let buffer = small_buffer();
        buffer.insert(b"a", 1).unwrap();
        buffer.set_armed(true);
        buffer.insert(b"b", 2).unwrap();
        buffer.set_armed(false);

        assert!(!buffer.get().unwrap().armed());
        assert!(buffer.get().unwrap().armed());
    }

    #[test]
    fn test_second_get_while_view_held_is_rejected() {
        let buffer = small_buffer();
        buffer.insert(b"x", 1).unwrap();
        buffer.insert(b"y", 2).unwrap();

        let first = buffer.get().unwrap();
        assert!(matches!(
            buffer.try_get(),
            Err(AvError::ConsumerBusy { .. })
        ));
        drop(first);
        assert_eq!(buffer.try_get().unwrap().unwrap().payload(), b"y");
    }

    #[test]
    fn test_get_timeout_on_empty_buffer() {
        let buffer = small_buffer();
        let started = Instant::now();
        let view = buffer.get_timeout(Duration::from_millis(20)).unwrap();
        assert!(view.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_zero_length_payload() {
        let buffer = small_buffer();
        buffer.insert(&[], 7).unwrap();
        let view = buffer.get().unwrap();
        assert!(view.is_empty());
        assert_eq!(view.timestamp(), 7);
    }

    #[test]
    fn test_oversize_chunk_rejected() {
        let buffer = small_buffer();
        let payload = vec![0u8; buffer.max_payload() + 1];
        let err = buffer.insert(&payload, 0).unwrap_err();
        assert!(matches!(err, AvError::OversizeChunk { framed: 1001, max: 1000, .. }));
        assert_eq!(buffer.occupied(), 0);

        // Exactly max_chunk is accepted
        let payload = vec![0u8; buffer.max_payload()];
        buffer.insert(&payload, 0).unwrap();
    }

    #[test]
    fn test_overflow_without_consumer() {
        let buffer = small_buffer();
        let payload = vec![0u8; 1000 - HEADER_SIZE];

        // 5 full chunks reach the 5000 byte limit
        for i in 0..5 {
            buffer.insert(&payload, i).unwrap();
        }
        let err = buffer.insert(&payload, 5).unwrap_err();
        assert!(matches!(err, AvError::Overflow { occupied: 5000, limit: 5000, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let buffer = small_buffer();
        let mut next_expected = 0u64;

        for i in 0..200u64 {
            let len = 100 + (i as usize * 37) % 800;
            let payload = vec![(i % 251) as u8; len];
            buffer.insert(&payload, i).unwrap();

            if i % 3 == 2 {
                while let Some(view) = buffer.try_get().unwrap() {
                    assert_eq!(view.timestamp(), next_expected);
                    assert!(view.payload().iter().all(|&b| b == (next_expected % 251) as u8));
                    next_expected += 1;
                }
            }
        }
        while let Some(view) = buffer.try_get().unwrap() {
            assert_eq!(view.timestamp(), next_expected);
            next_expected += 1;
        }
        assert_eq!(next_expected, 200);
        assert_eq!(buffer.stats().consumed_chunks, 200);
    }

    #[test]
    fn test_observers_see_every_chunk() {
        let buffer = small_buffer();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let handle = buffer.subscribe(Arc::new(move |chunk: &ObservedChunk<'_>| {
            assert_eq!(chunk.payload.len(), 4);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        for i in 0..5 {
            buffer.insert(b"data", i).unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        assert!(buffer.unsubscribe(handle));
        assert!(!buffer.unsubscribe(handle));
        buffer.insert(b"data", 5).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[traced_test]
    #[test]
    fn test_slow_observer_is_reported() {
        let buffer = small_buffer();
        buffer.subscribe(Arc::new(|_: &ObservedChunk<'_>| {
            std::thread::sleep(Duration::from_millis(5));
        }));

        buffer.insert(b"frame", 1).unwrap();

        assert!(logs_contain("Observer exceeded its time budget"));
        assert!(logs_contain("closure_observer"));
        // The record is still delivered to the primary consumer
        assert_eq!(buffer.get().unwrap().payload(), b"frame");
    }

    #[traced_test]
    #[test]
    fn test_overflow_is_logged_with_stream() {
        let buffer = small_buffer();
        let payload = vec![0u8; buffer.max_payload()];
        while buffer.insert(&payload, 0).is_ok() {}

        assert!(logs_contain("Cyclic buffer overflow"));
        assert!(logs_contain("stream=test"));
    }

    #[test]
    fn test_tap_receives_nth_chunk() {
        let buffer = small_buffer();
        let mut rx = buffer.register_tap("preview".to_string(), 2).unwrap();
        assert_eq!(buffer.tap_count(), 1);

        for i in 0..6u8 {
            buffer.insert(&[i], i as u64).unwrap();
        }

        let mut timestamps = Vec::new();
        while let Ok(tapped) = rx.try_recv() {
            timestamps.push(tapped.timestamp);
        }
        assert_eq!(timestamps, vec![0, 2, 4]);
        assert_eq!(buffer.list_taps()[0].delivered, 3);
        assert!(buffer.unregister_tap("preview"));
    }

    #[test]
    fn test_armed_only_tap_follows_armed_flag() {
        let buffer = small_buffer();
        let mut rx = buffer
            .register_tap_filtered("recorded".to_string(), TapFilter::every(1).armed_only())
            .unwrap();

        for i in 0..6u64 {
            buffer.set_armed((2..5).contains(&i));
            buffer.insert(&[i as u8], i).unwrap();
        }

        let mut timestamps = Vec::new();
        while let Ok(tapped) = rx.try_recv() {
            assert!(tapped.armed);
            timestamps.push(tapped.timestamp);
        }
        assert_eq!(timestamps, vec![2, 3, 4]);
        assert_eq!(buffer.stats().tap_dropped, 0);
    }

    #[test]
    fn test_producer_consumer_threads() {
        let buffer = Arc::new(small_buffer());
        let producer_buffer = buffer.clone();

        let producer = std::thread::spawn(move || {
            for i in 0..2000u64 {
                let payload = (i as u32).to_le_bytes().repeat(1 + (i as usize % 50));
                loop {
                    match producer_buffer.insert(&payload, i) {
                        Ok(()) => break,
                        Err(AvError::Overflow { .. }) => std::thread::yield_now(),
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }
        });

        for i in 0..2000u64 {
            let view = buffer.get().unwrap();
            assert_eq!(view.timestamp(), i);
            assert_eq!(&view.payload()[..4], &(i as u32).to_le_bytes());
        }
        producer.join().unwrap();
    }
}

//! Fixed-slot ring for the low-latency feedback audio path.
//!
//! The acquisition observer pushes one audio period per slot; the playback
//! thread pops one period per callback. Neither side ever waits for the
//! other:
//!
//! - **Full**: the new period is discarded and counted. Already queued audio
//!   keeps its order, so the speaker never jumps backwards.
//! - **Empty**: the pop yields a period of silence (all zero bytes).
//!
//! Both conditions are expected during start-up and device hiccups and are
//! only logged at `trace` level.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use avrec_core::error::{AppResult, AvError};

/// What a pop produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    /// A queued slot was copied out
    Data,
    /// The ring was empty; the output was zero-filled
    Silence,
}

/// Counters of an [`OverwriteRingBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Slots accepted by `push`
    pub pushed: u64,
    /// Pushes discarded because the ring was full
    pub dropped: u64,
    /// Slots returned by `pop`
    pub popped: u64,
    /// Pops that found the ring empty
    pub underflows: u64,
}

struct Slots {
    data: Vec<u8>,
    head: usize,
    tail: usize,
}

/// Bounded ring of `n_items` fixed-size slots.
///
/// One physical slot more than `n_items` is allocated so that `head == tail`
/// means empty and `(head + 1) % (n_items + 1) == tail` means full.
pub struct OverwriteRingBuffer {
    slot_size: usize,
    n_slots: usize,
    slots: Mutex<Slots>,

    pushed: AtomicU64,
    dropped: AtomicU64,
    popped: AtomicU64,
    underflows: AtomicU64,
}

impl OverwriteRingBuffer {
    /// Create a ring holding up to `n_items` slots of `slot_size` bytes.
    pub fn new(n_items: usize, slot_size: usize) -> AppResult<Self> {
        if n_items == 0 || slot_size == 0 {
            return Err(AvError::Configuration(format!(
                "Overwrite ring needs at least one slot of at least one byte (got {} x {})",
                n_items, slot_size
            )));
        }

        let n_slots = n_items + 1;
        Ok(Self {
            slot_size,
            n_slots,
            slots: Mutex::new(Slots {
                data: vec![0u8; n_slots * slot_size],
                head: 0,
                tail: 0,
            }),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            underflows: AtomicU64::new(0),
        })
    }

    /// Bytes per slot
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Maximum number of queued slots
    pub fn capacity(&self) -> usize {
        self.n_slots - 1
    }

    /// Queue one slot.
    ///
    /// Shorter input is zero-padded and longer input truncated to the slot
    /// size. Returns false if the ring was full and the input discarded.
    pub fn push(&self, data: &[u8]) -> bool {
        let mut slots = self.slots.lock();

        let next_head = (slots.head + 1) % self.n_slots;
        if next_head == slots.tail {
            drop(slots);
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(dropped, "Overwrite ring full, period discarded");
            return false;
        }

        let start = slots.head * self.slot_size;
        let copied = data.len().min(self.slot_size);
        let slot = &mut slots.data[start..start + self.slot_size];
        slot[..copied].copy_from_slice(&data[..copied]);
        slot[copied..].fill(0);
        slots.head = next_head;

        self.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Copy the oldest slot into `out`, or zeros if the ring is empty.
    ///
    /// At most `slot_size` bytes are written; any remainder of a longer
    /// `out` is zero-filled.
    pub fn pop_into(&self, out: &mut [u8]) -> PopOutcome {
        let mut slots = self.slots.lock();

        if slots.head == slots.tail {
            drop(slots);
            out.fill(0);
            let underflows = self.underflows.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(underflows, "Overwrite ring empty, returning silence");
            return PopOutcome::Silence;
        }

        let start = slots.tail * self.slot_size;
        let copied = out.len().min(self.slot_size);
        out[..copied].copy_from_slice(&slots.data[start..start + copied]);
        out[copied..].fill(0);
        slots.tail = (slots.tail + 1) % self.n_slots;

        self.popped.fetch_add(1, Ordering::Relaxed);
        PopOutcome::Data
    }

    /// Pop one slot into a freshly allocated vector of `slot_size` bytes.
    pub fn pop(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.slot_size];
        self.pop_into(&mut out);
        out
    }

    /// Number of queued slots
    pub fn len(&self) -> usize {
        let slots = self.slots.lock();
        (slots.head + self.n_slots - slots.tail) % self.n_slots
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> RingStats {
        RingStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            underflows: self.underflows.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for OverwriteRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverwriteRingBuffer")
            .field("slot_size", &self.slot_size)
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

//! Best-effort tap mailboxes for secondary consumers.
//!
//! A tap receives owned copies of selected chunks through a bounded channel.
//! Selection is a [`TapFilter`]: every Nth chunk, optionally counting only
//! chunks captured while armed (a live preview of what is being recorded).
//! Delivery uses `try_send`, so a slow tap loses chunks instead of stalling
//! the producer thread.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use avrec_core::error::{AppResult, AvError};
use avrec_core::observer::ObservedChunk;

/// Default channel capacity for tap consumers (number of chunks buffered)
pub const DEFAULT_TAP_CHANNEL_SIZE: usize = 16;

/// Owned copy of a chunk delivered to a tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TappedChunk {
    /// Copied payload bytes
    pub payload: Vec<u8>,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Armed flag stamped on the record
    pub armed: bool,
    /// Position of this chunk among the chunks the tap's filter matched
    pub sequence: u64,
}

/// Which chunks a tap wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapFilter {
    /// Deliver every nth matching chunk (1 = all of them)
    pub nth_chunk: usize,
    /// Ignore chunks captured while disarmed
    pub armed_only: bool,
}

impl TapFilter {
    /// Every `nth` chunk regardless of the armed flag (0 is treated as 1)
    pub fn every(nth: usize) -> Self {
        Self {
            nth_chunk: nth.max(1),
            armed_only: false,
        }
    }

    /// Only count chunks captured while armed
    #[must_use]
    pub fn armed_only(mut self) -> Self {
        self.armed_only = true;
        self
    }

    fn matches(&self, chunk: &ObservedChunk<'_>) -> bool {
        chunk.armed || !self.armed_only
    }
}

impl Default for TapFilter {
    fn default() -> Self {
        Self::every(1)
    }
}

/// Snapshot of one registered tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapInfo {
    /// Tap id
    pub id: String,
    /// Selection
    pub filter: TapFilter,
    /// Chunks handed to the mailbox
    pub delivered: u64,
    /// Chunks lost to a full mailbox
    pub dropped: u64,
}

/// Outcome of offering a chunk to one tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    Skipped,
    Delivered,
    Dropped,
    Disconnected,
}

struct Tap {
    filter: TapFilter,
    sender: mpsc::Sender<TappedChunk>,
    matched: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Tap {
    fn offer(&self, chunk: &ObservedChunk<'_>, copy: &mut Option<Vec<u8>>) -> Offer {
        if !self.filter.matches(chunk) {
            return Offer::Skipped;
        }
        let sequence = self.matched.fetch_add(1, Ordering::Relaxed);
        if sequence % self.filter.nth_chunk as u64 != 0 {
            return Offer::Skipped;
        }

        let payload = copy.get_or_insert_with(|| chunk.payload.to_vec()).clone();
        let tapped = TappedChunk {
            payload,
            timestamp: chunk.timestamp,
            armed: chunk.armed,
            sequence,
        };
        match self.sender.try_send(tapped) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Offer::Delivered
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Disconnected,
        }
    }

    fn info(&self, id: &str) -> TapInfo {
        TapInfo {
            id: id.to_string(),
            filter: self.filter,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Registry of the taps attached to one stream buffer.
#[derive(Default)]
pub struct TapRegistry {
    taps: RwLock<HashMap<String, Tap>>,
}

impl TapRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tap with the default mailbox size
    pub fn register(&self, id: String, filter: TapFilter) -> AppResult<mpsc::Receiver<TappedChunk>> {
        self.register_with_capacity(id, filter, DEFAULT_TAP_CHANNEL_SIZE)
    }

    /// Register a tap with an explicit mailbox size
    pub fn register_with_capacity(
        &self,
        id: String,
        filter: TapFilter,
        capacity: usize,
    ) -> AppResult<mpsc::Receiver<TappedChunk>> {
        let mut taps = self.taps.write();
        if taps.contains_key(&id) {
            return Err(AvError::Configuration(format!(
                "Tap with ID '{}' already exists",
                id
            )));
        }

        let (sender, rx) = mpsc::channel(capacity.max(1));
        taps.insert(
            id,
            Tap {
                filter: TapFilter {
                    nth_chunk: filter.nth_chunk.max(1),
                    ..filter
                },
                sender,
                matched: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
        );
        Ok(rx)
    }

    /// Unregister a tap
    pub fn unregister(&self, id: &str) -> bool {
        self.taps.write().remove(id).is_some()
    }

    /// Offer a chunk to every tap.
    ///
    /// The payload is copied at most once, and only if some tap wants it.
    /// Taps whose receiver was dropped are removed.
    pub fn notify_all(&self, chunk: &ObservedChunk<'_>) {
        let mut disconnected = Vec::new();
        {
            let taps = self.taps.read();
            if taps.is_empty() {
                return;
            }
            let mut copy = None;
            for (id, tap) in taps.iter() {
                match tap.offer(chunk, &mut copy) {
                    Offer::Dropped => trace!(tap = %id, "Tap mailbox full, chunk dropped"),
                    Offer::Disconnected => disconnected.push(id.clone()),
                    Offer::Skipped | Offer::Delivered => {}
                }
            }
        }

        if !disconnected.is_empty() {
            let mut taps = self.taps.write();
            for id in disconnected {
                trace!(tap = %id, "Tap receiver gone, removing");
                taps.remove(&id);
            }
        }
    }

    /// Number of registered taps
    pub fn count(&self) -> usize {
        self.taps.read().len()
    }

    /// Every registered tap, sorted by id
    pub fn list(&self) -> Vec<TapInfo> {
        let mut list: Vec<_> = self
            .taps
            .read()
            .iter()
            .map(|(id, tap)| tap.info(id))
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Total chunks dropped across all taps
    pub fn dropped_total(&self) -> u64 {
        self.taps
            .read()
            .values()
            .map(|tap| tap.dropped.load(Ordering::Relaxed))
            .sum()
    }
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapRegistry").field("taps", &self.list()).finish()
    }
}

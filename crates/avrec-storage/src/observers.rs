//! Observers shipped with the recording pipeline.
//!
//! Both run on the microphone's acquisition thread, so each does a bounded
//! amount of work per period and never blocks.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use avrec_core::limits::{AUDIO_BYTES_PER_SAMPLE, LEVEL_HISTORY_PERIODS};
use avrec_core::observer::{ChunkObserver, ObservedChunk};

use crate::overwrite_ring::OverwriteRingBuffer;

/// Per-channel peak level of interleaved S16 LE audio.
///
/// Keeps the peak of each of the last `history` periods and reports the
/// maximum over that window, which gives the level bars a short hold time.
#[derive(Debug)]
pub struct LevelMeter {
    channels: usize,
    history: usize,
    peaks: Mutex<VecDeque<Vec<u16>>>,
}

impl LevelMeter {
    /// Meter for `channels` interleaved channels over the default history
    pub fn new(channels: usize) -> Self {
        Self::with_history(channels, LEVEL_HISTORY_PERIODS)
    }

    /// Meter with an explicit history length in periods
    pub fn with_history(channels: usize, history: usize) -> Self {
        let history = history.max(1);
        Self {
            channels: channels.max(1),
            history,
            peaks: Mutex::new(VecDeque::with_capacity(history + 1)),
        }
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Peak absolute sample value per channel over the history window
    pub fn levels(&self) -> Vec<u16> {
        let peaks = self.peaks.lock();
        let mut levels = vec![0u16; self.channels];
        for period in peaks.iter() {
            for (level, &peak) in levels.iter_mut().zip(period) {
                *level = (*level).max(peak);
            }
        }
        levels
    }

    fn period_peaks(&self, payload: &[u8]) -> Vec<u16> {
        let mut peaks = vec![0u16; self.channels];
        let frame_bytes = self.channels * AUDIO_BYTES_PER_SAMPLE;
        for frame in payload.chunks_exact(frame_bytes) {
            for (peak, sample) in peaks
                .iter_mut()
                .zip(frame.chunks_exact(AUDIO_BYTES_PER_SAMPLE))
            {
                let value = i16::from_le_bytes([sample[0], sample[1]]).unsigned_abs();
                *peak = (*peak).max(value);
            }
        }
        peaks
    }
}

impl ChunkObserver for LevelMeter {
    fn on_chunk(&self, chunk: &ObservedChunk<'_>) {
        let period = self.period_peaks(chunk.payload);
        let mut peaks = self.peaks.lock();
        peaks.push_back(period);
        while peaks.len() > self.history {
            peaks.pop_front();
        }
    }

    fn name(&self) -> &'static str {
        "level_meter"
    }
}

/// Forwards every audio period into the speaker feedback ring.
///
/// A full ring discards the period; see [`OverwriteRingBuffer::push`].
#[derive(Debug, Clone)]
pub struct FeedbackForwarder {
    ring: Arc<OverwriteRingBuffer>,
}

impl FeedbackForwarder {
    /// Forward into `ring`
    pub fn new(ring: Arc<OverwriteRingBuffer>) -> Self {
        Self { ring }
    }

    /// Target ring
    pub fn ring(&self) -> &Arc<OverwriteRingBuffer> {
        &self.ring
    }
}

impl ChunkObserver for FeedbackForwarder {
    fn on_chunk(&self, chunk: &ObservedChunk<'_>) {
        self.ring.push(chunk.payload);
    }

    fn name(&self) -> &'static str {
        "feedback_forwarder"
    }
}

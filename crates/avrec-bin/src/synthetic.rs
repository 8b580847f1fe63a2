//! Synthetic producers standing in for the microphone and cameras.
//!
//! They pace themselves in real time, so a simulated session exercises the
//! same buffer occupancy, observer and writer timing as a lab run.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use avrec_core::chunk::now_millis;
use avrec_core::config::AudioConfig;
use avrec_core::error::AppResult;
use avrec_storage::{CyclicStreamBuffer, OverwriteRingBuffer, PopOutcome, StreamWorker};

/// Sine-tone microphone producing interleaved S16 LE periods.
#[derive(Debug, Clone)]
pub struct SyntheticMicrophone {
    sample_rate: u32,
    channels: u32,
    frames_per_period: u32,
    tone_hz: f64,
}

impl SyntheticMicrophone {
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            frames_per_period: audio.frames_per_period,
            tone_hz: 440.0,
        }
    }

    pub fn period_duration(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.frames_per_period) / f64::from(self.sample_rate))
    }

    /// Period number `index`; channel `c` plays at amplitude 1/(c+2).
    pub fn period(&self, index: u64) -> Vec<u8> {
        let frames = self.frames_per_period as u64;
        let mut out = Vec::with_capacity((frames * u64::from(self.channels) * 2) as usize);
        for frame in 0..frames {
            let t = (index * frames + frame) as f64 / f64::from(self.sample_rate);
            let value = (TAU * self.tone_hz * t).sin();
            for channel in 0..self.channels {
                let amplitude = f64::from(i16::MAX) / f64::from(channel + 2);
                let sample = (value * amplitude) as i16;
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        out
    }

    pub fn spawn(self, buffer: Arc<CyclicStreamBuffer>) -> AppResult<StreamWorker> {
        StreamWorker::spawn("mic", move |stop| {
            let period = self.period_duration();
            paced(stop, period, |index| buffer.insert(&self.period(index), now_millis()))
        })
    }
}

/// Camera producing frames of varying size, roughly like a JPEG stream.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    camera: usize,
    fps: f64,
    frame_bytes: usize,
}

impl SyntheticCamera {
    pub fn new(camera: usize, fps: f64, frame_bytes: usize) -> Self {
        Self {
            camera,
            fps,
            frame_bytes,
        }
    }

    /// Frame number `index`: camera id and index up front, size varying by
    /// up to a quarter of `frame_bytes`.
    pub fn frame(&self, index: u64) -> Vec<u8> {
        let jitter = (index as usize * 7919) % (self.frame_bytes / 4 + 1);
        let len = (self.frame_bytes - self.frame_bytes / 8 + jitter).max(16);
        let mut frame = Vec::with_capacity(len);
        frame.extend_from_slice(&(self.camera as u64).to_le_bytes());
        frame.extend_from_slice(&index.to_le_bytes());
        frame.resize(len, (index % 251) as u8);
        frame
    }

    pub fn spawn(self, buffer: Arc<CyclicStreamBuffer>) -> AppResult<StreamWorker> {
        let name = format!("camera-{:02}", self.camera);
        StreamWorker::spawn(name, move |stop| {
            let interval = Duration::from_secs_f64(1.0 / self.fps);
            paced(stop, interval, |index| buffer.insert(&self.frame(index), now_millis()))
        })
    }
}

/// Playback side of the feedback path: pops one period per period interval.
pub fn spawn_speaker(ring: Arc<OverwriteRingBuffer>, period: Duration) -> AppResult<StreamWorker> {
    StreamWorker::spawn("speaker", move |stop| {
        let mut out = vec![0u8; ring.slot_size()];
        let mut silent = 0u64;
        paced(stop, period, |_| {
            if ring.pop_into(&mut out) == PopOutcome::Silence {
                silent += 1;
            }
            Ok(())
        })?;
        debug!(silent_periods = silent, "Speaker stopped");
        Ok(())
    })
}

/// Call `tick` every `interval` until `stop` is raised.
fn paced<F>(stop: &AtomicBool, interval: Duration, mut tick: F) -> AppResult<()>
where
    F: FnMut(u64) -> AppResult<()>,
{
    let mut next = Instant::now();
    let mut index = 0u64;
    while !stop.load(Ordering::Acquire) {
        tick(index)?;
        index += 1;
        next += interval;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        }
    }
    Ok(())
}

//! Recording session: the buffers and writers of one acquisition run.
//!
//! A session owns one audio stream and one stream per camera. Each stream is
//! a [`CyclicStreamBuffer`] drained by a [`RecordingFileWriter`] on its own
//! thread. The audio buffer additionally feeds a [`LevelMeter`] and, when
//! enabled, the speaker feedback ring.
//!
//! Producers are external: they obtain the buffers from the session and call
//! `insert` from their own threads. Arming is session wide, so all streams
//! start and stop their files on the same key press.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use avrec_core::clock::{SystemClock, WallClock};
use avrec_core::config::AvrecConfig;
use avrec_core::error::{AppResult, AvError};

use crate::cyclic_buffer::CyclicStreamBuffer;
use crate::file_format::{FileHeader, FileNaming};
use crate::file_writer::{ActiveFile, RecordingFileWriter};
use crate::observers::{FeedbackForwarder, LevelMeter};
use crate::overwrite_ring::OverwriteRingBuffer;
use crate::worker::StreamWorker;

struct SessionStream {
    buffer: Arc<CyclicStreamBuffer>,
    writer: Option<StreamWorker>,
    active: ActiveFile,
}

impl SessionStream {
    fn spawn(
        buffer: Arc<CyclicStreamBuffer>,
        naming: FileNaming,
        header: FileHeader,
        clock: Arc<dyn WallClock>,
        poll: Duration,
    ) -> AppResult<Self> {
        let writer = RecordingFileWriter::builder(buffer.label(), naming)
            .header(header)
            .clock(clock)
            .build();
        let active = writer.active_file();
        let worker = writer.spawn(Arc::clone(&buffer), poll)?;

        Ok(Self {
            buffer,
            writer: Some(worker),
            active,
        })
    }
}

/// Buffers, writers and observers of one recording run.
pub struct RecordingSession {
    audio: SessionStream,
    video: Vec<SessionStream>,
    level_meter: Arc<LevelMeter>,
    feedback: Option<Arc<OverwriteRingBuffer>>,
}

impl RecordingSession {
    /// Build all streams from `config` and start their writers.
    pub fn start(config: &AvrecConfig) -> AppResult<Self> {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`start`](Self::start) with an injected wall clock for file names.
    pub fn start_with_clock(config: &AvrecConfig, clock: Arc<dyn WallClock>) -> AppResult<Self> {
        config.validate()?;

        let storage = &config.storage.storage_path;
        if !storage.is_dir() {
            return Err(AvError::Configuration(format!(
                "storage_path {} is not a directory",
                storage.display()
            )));
        }
        let poll = config.buffers.consumer_poll();

        let audio_buffer = Arc::new(CyclicStreamBuffer::new(&config.buffers.audio_stream())?);

        let level_meter = Arc::new(LevelMeter::new(config.audio.channels as usize));
        audio_buffer.subscribe(level_meter.clone());

        let feedback = if config.audio.use_feedback {
            let ring = Arc::new(OverwriteRingBuffer::new(
                config.audio.speaker_buffer_slots,
                config.audio.period_bytes(),
            )?);
            audio_buffer.subscribe(Arc::new(FeedbackForwarder::new(Arc::clone(&ring))));
            Some(ring)
        } else {
            None
        };

        let audio = SessionStream::spawn(
            audio_buffer,
            FileNaming::audio(storage),
            FileHeader::Audio {
                sample_rate: config.audio.sample_rate,
                channels: config.audio.channels,
            },
            Arc::clone(&clock),
            poll,
        )?;

        let mut video = Vec::with_capacity(config.video.camera_count);
        for camera in 0..config.video.camera_count {
            let buffer = Arc::new(CyclicStreamBuffer::new(&config.buffers.video_stream(camera))?);
            video.push(SessionStream::spawn(
                buffer,
                FileNaming::video(storage, camera as u32),
                FileHeader::Video,
                Arc::clone(&clock),
                poll,
            )?);
        }

        info!(
            cameras = video.len(),
            feedback = feedback.is_some(),
            storage = %storage.display(),
            "Recording session started"
        );

        Ok(Self {
            audio,
            video,
            level_meter,
            feedback,
        })
    }

    /// Buffer the microphone thread inserts into
    pub fn audio_buffer(&self) -> &Arc<CyclicStreamBuffer> {
        &self.audio.buffer
    }

    /// Buffer of camera `camera`
    pub fn video_buffer(&self, camera: usize) -> Option<&Arc<CyclicStreamBuffer>> {
        self.video.get(camera).map(|s| &s.buffer)
    }

    /// Number of video streams
    pub fn camera_count(&self) -> usize {
        self.video.len()
    }

    /// Speaker feedback ring, if feedback is enabled
    pub fn feedback(&self) -> Option<&Arc<OverwriteRingBuffer>> {
        self.feedback.as_ref()
    }

    /// Current per-channel audio levels
    pub fn levels(&self) -> Vec<u16> {
        self.level_meter.levels()
    }

    fn streams(&self) -> impl Iterator<Item = &SessionStream> {
        std::iter::once(&self.audio).chain(self.video.iter())
    }

    /// Arm every stream; writers open new files with the next record.
    pub fn start_recording(&self) {
        for stream in self.streams() {
            stream.buffer.set_armed(true);
        }
        info!("Recording armed");
    }

    /// Disarm every stream; writers close their files with the next record.
    pub fn stop_recording(&self) {
        for stream in self.streams() {
            stream.buffer.set_armed(false);
        }
        info!("Recording disarmed");
    }

    /// Whether the session is armed
    pub fn is_recording(&self) -> bool {
        self.audio.buffer.is_armed()
    }

    /// Files currently being written, audio first
    pub fn active_files(&self) -> Vec<PathBuf> {
        self.streams().filter_map(|s| s.active.get()).collect()
    }

    /// Labels of streams whose writer thread has already exited.
    ///
    /// Writers only exit early on a fatal error; the error itself is returned
    /// by [`shutdown`](Self::shutdown).
    pub fn failed_streams(&self) -> Vec<String> {
        self.streams()
            .filter(|s| s.writer.as_ref().map_or(true, |w| w.is_finished()))
            .map(|s| s.buffer.label().to_string())
            .collect()
    }

    /// Wait until every buffer has been drained by its writer.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.streams().all(|s| s.buffer.occupied() == 0) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Disarm, stop every writer and close open files.
    ///
    /// Producers must be stopped by the caller afterwards. Returns the first
    /// writer error; the rest are logged.
    pub fn shutdown(mut self) -> AppResult<()> {
        self.stop_recording();

        let mut first_error = None;
        let streams = std::iter::once(&mut self.audio).chain(self.video.iter_mut());
        for stream in streams {
            let Some(worker) = stream.writer.take() else {
                continue;
            };
            if let Err(e) = worker.stop() {
                error!(stream = %stream.buffer.label(), error = %e, "Writer failed");
                first_error.get_or_insert(e);
            }
        }

        info!("Recording session stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("cameras", &self.video.len())
            .field("feedback", &self.feedback.is_some())
            .field("recording", &self.is_recording())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avrec_core::clock::FixedClock;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn config(dir: &std::path::Path, cameras: usize) -> AvrecConfig {
        let mut config = AvrecConfig::default();
        config.storage.storage_path = dir.to_path_buf();
        config.video.camera_count = cameras;
        config.buffers.video_capacity_bytes = 1 << 20;
        config.buffers.consumer_poll_ms = 5;
        config
    }

    fn clock() -> Arc<dyn WallClock> {
        Arc::new(FixedClock(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(10, 15, 30)
                .unwrap(),
        ))
    }

    #[test]
    fn test_missing_storage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir.path().join("missing"), 1);
        let err = RecordingSession::start(&config).unwrap_err();
        assert!(matches!(err, AvError::Configuration(_)));
    }

    #[test]
    fn test_arming_reaches_every_stream() {
        let dir = TempDir::new().unwrap();
        let session = RecordingSession::start_with_clock(&config(dir.path(), 2), clock()).unwrap();
        assert_eq!(session.camera_count(), 2);
        assert!(session.feedback().is_some());

        session.start_recording();
        assert!(session.is_recording());
        assert!(session.video_buffer(1).unwrap().is_armed());

        session.stop_recording();
        assert!(!session.audio_buffer().is_armed());
        assert!(session.failed_streams().is_empty());

        session.shutdown().unwrap();
    }

    #[test]
    fn test_session_writes_one_file_per_stream() {
        let dir = TempDir::new().unwrap();
        let session = RecordingSession::start_with_clock(&config(dir.path(), 1), clock()).unwrap();

        let period = vec![0u8; 940 * 2 * 2];
        session.start_recording();
        session.audio_buffer().insert(&period, 1).unwrap();
        session.video_buffer(0).unwrap().insert(b"jpeg", 1).unwrap();

        assert!(session.wait_drained(Duration::from_secs(5)));
        assert_eq!(session.active_files().len(), 2);
        assert_eq!(session.levels(), vec![0, 0]);

        session.shutdown().unwrap();

        assert!(dir.path().join("2024-03-01--10-15-30_audio_00.aud").exists());
        assert!(dir.path().join("2024-03-01--10-15-30_video_00.vid").exists());
    }
}

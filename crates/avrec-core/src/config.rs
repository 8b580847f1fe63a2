//! Configuration loading using Figment.
//!
//! Configuration is built once at process start and passed by value or
//! reference into every component constructor. Sources, later ones winning:
//! 1. Built-in defaults ([`AvrecConfig::default`])
//! 2. A TOML file (default `config/avrec.toml`, optional)
//! 3. Environment variables prefixed with `AVREC_`, nested keys separated by
//!    a double underscore
//!
//! # Example
//! ```no_run
//! use avrec_core::config::AvrecConfig;
//!
//! // AVREC_STORAGE__STORAGE_PATH=/data overrides storage.storage_path
//! let config = AvrecConfig::load()?;
//! config.validate()?;
//! println!("Recording to {}", config.storage.storage_path.display());
//! # Ok::<(), avrec_core::error::AvError>(())
//! ```

use crate::chunk::{framed_len, HEADER_SIZE};
use crate::error::{AppResult, AvError};
use crate::limits::{
    validate_buffer_sizing, BufferSizing, AUDIO_BYTES_PER_SAMPLE, DEFAULT_AUDIO_BUFFER_BYTES,
    DEFAULT_CONSUMER_POLL, DEFAULT_MAX_CHUNK_FRACTION, DEFAULT_SAFETY_MARGIN,
    DEFAULT_VIDEO_BUFFER_BYTES,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of cameras a session drives.
pub const MAX_CAMERAS: usize = 6;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvrecConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Stream buffer sizing
    #[serde(default)]
    pub buffers: BufferConfig,
    /// Audio stream parameters
    #[serde(default)]
    pub audio: AudioConfig,
    /// Video stream parameters
    #[serde(default)]
    pub video: VideoConfig,
    /// Output location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented (development)
    Pretty,
    /// One line per event (lab machines)
    #[default]
    Compact,
    /// One JSON object per event, for log shippers
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(AvError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: pretty, compact, json",
                s
            ))),
        }
    }
}

/// Cyclic buffer sizing shared by all streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Capacity of each video stream buffer in bytes
    #[serde(default = "default_video_capacity")]
    pub video_capacity_bytes: usize,
    /// Capacity of the audio stream buffer in bytes
    #[serde(default = "default_audio_capacity")]
    pub audio_capacity_bytes: usize,
    /// Fraction of capacity kept free against producer/consumer races
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    /// Maximum framed chunk size as a fraction of capacity
    #[serde(default = "default_max_chunk_fraction")]
    pub max_chunk_fraction: f64,
    /// Primary consumer wait before re-checking its stop flag, in milliseconds
    #[serde(default = "default_consumer_poll_ms")]
    pub consumer_poll_ms: u64,
}

/// Audio capture parameters relevant to framing and file headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sampling rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Number of interleaved channels
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Frames per capture period (one chunk)
    #[serde(default = "default_frames_per_period")]
    pub frames_per_period: u32,
    /// Number of periods held by the speaker feedback buffer
    #[serde(default = "default_speaker_slots")]
    pub speaker_buffer_slots: usize,
    /// Enable microphone to speaker feedback
    #[serde(default = "default_use_feedback")]
    pub use_feedback: bool,
}

/// Video stream parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Number of camera streams
    #[serde(default = "default_camera_count")]
    pub camera_count: usize,
}

/// Output location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory recording files are written to
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
}

/// Construction parameters of one cyclic stream buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBufferConfig {
    /// Stream label used in logs and errors (e.g. `audio`, `video_01`)
    pub label: String,
    /// Logical capacity in bytes
    pub capacity: usize,
    /// Fraction of capacity kept free
    pub safety_margin: f64,
    /// Maximum framed chunk size as a fraction of capacity
    pub max_chunk_fraction: f64,
}

impl StreamBufferConfig {
    /// Buffer parameters with default margin and chunk fraction.
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: label.into(),
            capacity,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            max_chunk_fraction: DEFAULT_MAX_CHUNK_FRACTION,
        }
    }

    /// Override the safety margin
    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Override the maximum chunk fraction
    pub fn with_max_chunk_fraction(mut self, fraction: f64) -> Self {
        self.max_chunk_fraction = fraction;
        self
    }

    /// Validate and derive the chunk and overflow limits.
    pub fn sizing(&self) -> AppResult<BufferSizing> {
        validate_buffer_sizing(
            self.capacity,
            self.safety_margin,
            self.max_chunk_fraction,
            HEADER_SIZE,
        )
        .map_err(|e| match e {
            AvError::Configuration(msg) => {
                AvError::Configuration(format!("stream '{}': {}", self.label, msg))
            }
            other => other,
        })
    }
}

// Default value functions
fn default_name() -> String {
    "avrec".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_video_capacity() -> usize {
    DEFAULT_VIDEO_BUFFER_BYTES
}

fn default_audio_capacity() -> usize {
    DEFAULT_AUDIO_BUFFER_BYTES
}

fn default_safety_margin() -> f64 {
    DEFAULT_SAFETY_MARGIN
}

fn default_max_chunk_fraction() -> f64 {
    DEFAULT_MAX_CHUNK_FRACTION
}

fn default_consumer_poll_ms() -> u64 {
    DEFAULT_CONSUMER_POLL.as_millis() as u64
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u32 {
    2
}

fn default_frames_per_period() -> u32 {
    940
}

fn default_speaker_slots() -> usize {
    4
}

fn default_use_feedback() -> bool {
    true
}

fn default_camera_count() -> usize {
    1
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/videodat")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            video_capacity_bytes: default_video_capacity(),
            audio_capacity_bytes: default_audio_capacity(),
            safety_margin: default_safety_margin(),
            max_chunk_fraction: default_max_chunk_fraction(),
            consumer_poll_ms: default_consumer_poll_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frames_per_period: default_frames_per_period(),
            speaker_buffer_slots: default_speaker_slots(),
            use_feedback: default_use_feedback(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            camera_count: default_camera_count(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
        }
    }
}

impl BufferConfig {
    /// Buffer parameters for the audio stream.
    #[must_use]
    pub fn audio_stream(&self) -> StreamBufferConfig {
        StreamBufferConfig::new("audio", self.audio_capacity_bytes)
            .with_safety_margin(self.safety_margin)
            .with_max_chunk_fraction(self.max_chunk_fraction)
    }

    /// Buffer parameters for the video stream of camera `camera`.
    #[must_use]
    pub fn video_stream(&self, camera: usize) -> StreamBufferConfig {
        StreamBufferConfig::new(format!("video_{:02}", camera), self.video_capacity_bytes)
            .with_safety_margin(self.safety_margin)
            .with_max_chunk_fraction(self.max_chunk_fraction)
    }

    /// Primary consumer poll interval.
    #[must_use]
    pub fn consumer_poll(&self) -> Duration {
        Duration::from_millis(self.consumer_poll_ms)
    }
}

impl AudioConfig {
    /// Size of one interleaved S16 LE capture period in bytes.
    #[must_use]
    pub fn period_bytes(&self) -> usize {
        self.frames_per_period as usize * self.channels as usize * AUDIO_BYTES_PER_SAMPLE
    }
}

impl AvrecConfig {
    /// Load configuration from `config/avrec.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/avrec.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AvrecConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AVREC_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string on top of the defaults.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AvrecConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(AvError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let audio_sizing = self.buffers.audio_stream().sizing()?;
        if self.video.camera_count > 0 {
            self.buffers.video_stream(0).sizing()?;
        }

        if self.video.camera_count > MAX_CAMERAS {
            return Err(AvError::Configuration(format!(
                "camera_count {} exceeds maximum of {}",
                self.video.camera_count, MAX_CAMERAS
            )));
        }

        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(AvError::Configuration(
                "audio sample_rate and channels must be positive".to_string(),
            ));
        }

        if self.audio.frames_per_period == 0 {
            return Err(AvError::Configuration(
                "audio frames_per_period must be positive".to_string(),
            ));
        }

        let framed_period = framed_len(self.audio.period_bytes());
        if framed_period > audio_sizing.max_chunk {
            return Err(AvError::Configuration(format!(
                "audio period of {} framed bytes exceeds the audio buffer's maximum chunk of {} bytes",
                framed_period, audio_sizing.max_chunk
            )));
        }

        if self.audio.use_feedback && self.audio.speaker_buffer_slots == 0 {
            return Err(AvError::Configuration(
                "speaker_buffer_slots must be positive when feedback is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

//! CLI Entry Point for avrec
//!
//! Provides command-line interface for:
//! - Running a simulated recording session (synthetic microphone and cameras)
//! - Inspecting recording files
//! - Repairing recordings cut short by a crash
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! avrec --config config/avrec.toml simulate --seconds 10
//! avrec info /videodat/2024-03-01--10-15-30_audio_00.aud
//! avrec repair broken.vid fixed.vid
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod synthetic;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use avrec_core::config::{AvrecConfig, LogFormat};
use avrec_core::logging;
use avrec_storage::{repair, summarize, RecordingSession, StreamWorker};

use crate::synthetic::{spawn_speaker, SyntheticCamera, SyntheticMicrophone};

#[derive(Parser)]
#[command(name = "avrec")]
#[command(about = "Synchronized audio/video recording station", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to config/avrec.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record from synthetic producers through a full session
    Simulate {
        /// Seconds to keep recording armed
        #[arg(long, default_value = "5")]
        seconds: f64,

        /// Seconds of disarmed streaming before and after the recording
        #[arg(long, default_value = "0.5")]
        lead_in: f64,

        /// Override the storage directory
        #[arg(long)]
        storage: Option<PathBuf>,

        /// Override the number of cameras
        #[arg(long)]
        cameras: Option<usize>,

        /// Frames per second of each synthetic camera
        #[arg(long, default_value = "30")]
        fps: f64,

        /// Nominal frame size in bytes
        #[arg(long, default_value = "40000")]
        frame_bytes: usize,
    },

    /// Summarize recording files
    Info {
        /// Files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Copy the intact part of a damaged recording
    Repair {
        /// Damaged recording
        src: PathBuf,
        /// Destination for the repaired copy
        dst: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AvrecConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AvrecConfig::load().context("loading configuration")?,
    };
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }
    logging::init_from_config(&config).context("initializing logging")?;

    match cli.command {
        Commands::Simulate {
            seconds,
            lead_in,
            storage,
            cameras,
            fps,
            frame_bytes,
        } => {
            if let Some(storage) = storage {
                config.storage.storage_path = storage;
            }
            if let Some(cameras) = cameras {
                config.video.camera_count = cameras;
            }
            simulate(
                &config,
                seconds_arg("--seconds", seconds)?,
                seconds_arg("--lead-in", lead_in)?,
                fps,
                frame_bytes,
            )
        }
        Commands::Info { files } => show_info(&files),
        Commands::Repair { src, dst } => repair_file(&src, &dst),
        Commands::Config => {
            config.validate().context("configuration is invalid")?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn simulate(
    config: &AvrecConfig,
    armed_for: Duration,
    lead_in: Duration,
    fps: f64,
    frame_bytes: usize,
) -> Result<()> {
    if !(fps.is_finite() && fps > 0.0) {
        bail!("--fps must be a positive number, got {}", fps);
    }
    if frame_bytes < 16 {
        bail!("--frame-bytes must be at least 16");
    }

    let session = RecordingSession::start(config).context("starting recording session")?;

    let mic = SyntheticMicrophone::from_config(&config.audio);
    let period = mic.period_duration();
    let mut producers: Vec<StreamWorker> = vec![mic.spawn(Arc::clone(session.audio_buffer()))?];
    for camera in 0..session.camera_count() {
        if let Some(buffer) = session.video_buffer(camera) {
            let camera = SyntheticCamera::new(camera, fps, frame_bytes);
            producers.push(camera.spawn(Arc::clone(buffer))?);
        }
    }
    let speaker = session
        .feedback()
        .map(|ring| spawn_speaker(Arc::clone(ring), period))
        .transpose()?;

    std::thread::sleep(lead_in);
    session.start_recording();

    let deadline = Instant::now() + armed_for;
    let mut failed = Vec::new();
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(Duration::from_millis(250).min(remaining));
        failed = session.failed_streams();
        if !failed.is_empty() {
            break;
        }
        info!(levels = ?session.levels(), files = session.active_files().len(), "Recording");
    }

    session.stop_recording();
    std::thread::sleep(lead_in);
    if !session.wait_drained(Duration::from_secs(5)) {
        warn!("Buffers not drained before shutdown");
    }
    let files = session.active_files();
    if !files.is_empty() {
        warn!(?files, "Files still open at shutdown");
    }

    // Writers first, then producers
    let session_result = session.shutdown();
    let mut producer_errors = Vec::new();
    for producer in producers {
        let name = producer.name().to_string();
        if let Err(e) = producer.stop() {
            producer_errors.push(format!("{}: {}", name, e));
        }
    }
    if let Some(speaker) = speaker {
        speaker.stop()?;
    }

    session_result.context("recording session failed")?;
    if !failed.is_empty() {
        bail!("streams failed during recording: {}", failed.join(", "));
    }
    if !producer_errors.is_empty() {
        bail!("producers failed: {}", producer_errors.join("; "));
    }

    println!("Recordings in {}:", config.storage.storage_path.display());
    let mut entries: Vec<_> = std::fs::read_dir(&config.storage.storage_path)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("aud" | "vid")))
        .collect();
    entries.sort();
    for path in entries {
        println!("  {}", path.display());
    }
    Ok(())
}

/// A non-negative, finite number of seconds.
fn seconds_arg(flag: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("{} must be a non-negative number of seconds, got {}", flag, seconds))
}

fn show_info(files: &[PathBuf]) -> Result<()> {
    for path in files {
        let summary = summarize(path).with_context(|| format!("reading {}", path.display()))?;
        println!("{}", path.display());
        println!("  kind:          {}", summary.kind());
        println!("  version:       {}", summary.version);
        if let avrec_storage::FileHeader::Audio {
            sample_rate,
            channels,
        } = summary.header
        {
            println!("  sample rate:   {} Hz", sample_rate);
            println!("  channels:      {}", channels);
        }
        println!("  records:       {}", summary.records);
        println!("  payload bytes: {}", summary.payload_bytes);
        if let (Some(first), Some(last)) = (summary.first_timestamp, summary.last_timestamp) {
            println!("  timestamps:    {} .. {} ({} ms)", first, last, summary.duration_ms());
        }
        if summary.truncated {
            println!(
                "  TRUNCATED:     {} of {} bytes intact (try `avrec repair`)",
                summary.valid_bytes, summary.file_bytes
            );
        }
    }
    Ok(())
}

fn repair_file(src: &std::path::Path, dst: &std::path::Path) -> Result<()> {
    let report = repair(src, dst).with_context(|| format!("repairing {}", src.display()))?;
    println!(
        "Kept {} records ({} bytes), dropped {} bytes",
        report.records_kept, report.bytes_written, report.bytes_dropped
    );
    Ok(())
}

//! Tracing initialization.
//!
//! Acquisition and writer threads log through the `tracing` macros with
//! structured fields (`stream`, `path`, `occupied`, ...). This module installs
//! one `tracing-subscriber` formatter chosen by `application.log_format`:
//! - `pretty` for development, `compact` for lab machines, `json` for shippers
//! - `RUST_LOG` overrides the configured level
//! - Thread names are always included, since every stream runs on a named
//!   thread (`writer-video_00`, `mic`, ...)
//!
//! # Example
//! ```no_run
//! use avrec_core::{config::AvrecConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AvrecConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(stream = "audio", "Recording started");
//! # Ok(())
//! # }
//! ```

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{AvrecConfig, LogFormat};
use crate::error::{AppResult, AvError};

/// Resolved logging settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Maximum level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// Colored output; only honoured by the text formats
    pub ansi: bool,
}

impl LoggingConfig {
    /// Settings from the `application` section. Colors follow whether stdout
    /// is a terminal.
    pub fn from_config(config: &AvrecConfig) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ansi: std::io::stdout().is_terminal(),
        })
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &AvrecConfig) -> AppResult<()> {
    init(LoggingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// A second call is a no-op returning `Ok(())`, so tests and embedding
/// applications may call it freely.
pub fn init(config: LoggingConfig) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let base = fmt::layer().with_thread_names(true);
    let layer = match config.format {
        LogFormat::Pretty => base.pretty().with_ansi(config.ansi).boxed(),
        LogFormat::Compact => base.compact().with_ansi(config.ansi).boxed(),
        LogFormat::Json => base.json().with_ansi(false).boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(AvError::Configuration(format!(
            "Failed to initialize tracing: {}",
            e
        ))),
    }
}

/// Parse a log level name (case-insensitive)
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    level.parse::<Level>().map_err(|_| {
        AvError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))
    })
}

//! Logging setup
//!
//! The drivers only emit `tracing` events; they never install a subscriber.
//! Each device session records its events inside a span it receives at
//! construction, so an application decides where a device's logs go by
//! choosing that span. [`init`] is a convenience for applications and
//! examples that want a ready-made `tracing-subscriber` setup.
//!
//! # Example
//! ```no_run
//! use crs_devices::logging::{self, LoggingConfig, OutputFormat};
//! use tracing::Level;
//!
//! logging::init(LoggingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! # Ok::<(), crs_devices::error::CrsError>(())
//! ```

use crate::config::CrsConfig;
use crate::error::{CrsError, CrsResult};
use tracing::{Level, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    Compact,
}

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Logging config at `level` with default settings
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Logging config from the application section of a [`CrsConfig`]
    pub fn from_config(config: &CrsConfig) -> CrsResult<Self> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install a global fmt subscriber.
///
/// Idempotent: if a global subscriber already exists this returns `Ok(())`.
/// Any other installation failure is a `Configuration` error.
pub fn init(config: LoggingConfig) -> CrsResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| ignore_already_set(&e.to_string()))
}

/// Accept an init failure caused by an existing global dispatcher; reject
/// anything else, such as a conflicting `log` logger.
fn ignore_already_set(error: &str) -> CrsResult<()> {
    if error.contains(DISPATCHER_ALREADY_SET) {
        Ok(())
    } else {
        Err(CrsError::Configuration(format!(
            "Failed to initialize tracing: {error}"
        )))
    }
}

const DISPATCHER_ALREADY_SET: &str = "a global default trace dispatcher has already been set";

/// Parse a log level name (trace, debug, info, warn, error)
pub fn parse_log_level(level: &str) -> CrsResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(CrsError::Configuration(format!(
            "Invalid log level '{other}'"
        ))),
    }
}

/// Default span for a ColorCAL session on `port`.
pub fn colorcal_span(port: &str) -> Span {
    tracing::info_span!("colorcal", port = %port)
}

/// Default span for an OptiCal session on `port`.
pub fn optical_span(port: &str) -> Span {
    tracing::info_span!("optical", port = %port)
}

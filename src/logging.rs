//! Log output setup.
//!
//! Logs go to stderr so they never interleave with sink output on stdout.

use serde::Deserialize;
use std::io;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{FromEnvError, LevelFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable key/value lines
    #[default]
    #[serde(alias = "simple")]
    Structured,
    /// One JSON object per line
    Json,
}

/// The `logging` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(rename = "type")]
    pub format: LogFormat,
    /// `trace`, `debug`, `info`, `warn` or `error`. Empty means `info`.
    pub level: String,
    pub timestamps: bool,
    /// Add the source file and line to every event.
    pub with_caller: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: LogFormat::default(),
            level: String::new(),
            timestamps: true,
            with_caller: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid logging level {0:?}")]
    InvalidLevel(String),
    #[error("invalid RUST_LOG directives: {0}")]
    Filter(#[from] FromEnvError),
    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Map a configured level name to a filter. `fatal` and `panic` are accepted
/// as aliases of `error`.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "" => Ok(LevelFilter::INFO),
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "error" | "fatal" | "panic" => Ok(LevelFilter::ERROR),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, replaces the
/// configured level.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let level = parse_level(&config.level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_file(config.with_caller)
        .with_line_number(config.with_caller);

    let result = match (config.format, config.timestamps) {
        (LogFormat::Json, true) => builder.json().try_init(),
        (LogFormat::Json, false) => builder.json().without_time().try_init(),
        (LogFormat::Structured, true) => builder.try_init(),
        (LogFormat::Structured, false) => builder.without_time().try_init(),
    };
    result.map_err(|e| LoggingError::Init(e.to_string()))
}

//! Logging configuration and initialization.
//!
//! JSON output by default, pretty output for development. The filter comes
//! from `MINERHUB_LOG` (falling back to `RUST_LOG`), the format from
//! `MINERHUB_LOG_FORMAT` and the optional output file from `MINERHUB_LOG_FILE`.

use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logging (default for production).
    #[default]
    Json,
    /// Human-readable pretty printing (for development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (JSON or Pretty).
    pub format: LogFormat,
    /// Log level filter (e.g., "info", "minerhub_core=debug").
    pub level: String,
    /// Optional file path for log output. If None, logs to stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "minerhub_core=info,warn".to_string(),
            output_path: None,
        }
    }
}

impl LogConfig {
    /// Read overrides from the environment on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = std::env::var("MINERHUB_LOG")
            .ok()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .filter(|l| !l.trim().is_empty())
        {
            config.level = level;
        }
        if let Ok(format) = std::env::var("MINERHUB_LOG_FORMAT") {
            config.format = match format.to_ascii_lowercase().as_str() {
                "pretty" | "text" => LogFormat::Pretty,
                _ => LogFormat::Json,
            };
        }
        config.output_path = std::env::var_os("MINERHUB_LOG_FILE").map(PathBuf::from);
        config
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Failed to open log file: {0}")]
    FileOpen(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// Call once at startup; a second call fails with `AlreadyInitialized`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| LogError::InvalidFilter(e.to_string()))?;

    match config.format {
        LogFormat::Json => init_json_subscriber(filter, &config.output_path),
        LogFormat::Pretty => init_pretty_subscriber(filter, &config.output_path),
    }
}

fn init_json_subscriber(filter: EnvFilter, path: &Option<PathBuf>) -> Result<(), LogError> {
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(path) = path {
        let file = open_log_file(path)?;
        registry
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;
    } else {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;
    }

    Ok(())
}

fn init_pretty_subscriber(filter: EnvFilter, path: &Option<PathBuf>) -> Result<(), LogError> {
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(path) = path {
        let file = open_log_file(path)?;
        registry
            .with(fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;
    } else {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;
    }
    Ok(())
}

fn open_log_file(path: &std::path::Path) -> Result<std::fs::File, LogError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| LogError::FileOpen(e.to_string()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LogError::FileOpen(e.to_string()))
}

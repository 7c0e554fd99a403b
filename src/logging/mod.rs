//! Structured logging setup using tracing
//!
//! Console output for development plus optional JSON file logging with
//! rotation. Log lines must never contain raw subject keys or field values;
//! call sites log pseudonyms, counts, and policy version prefixes only.
//!
//! # Example
//!
//! ```no_run
//! use veil::logging::{init_logging, LoggingSettings};
//!
//! let settings = LoggingSettings::default();
//! let _guard = init_logging("info", &settings).expect("Failed to initialize logging");
//! tracing::info!("Engine starting");
//! ```

use crate::domain::{Result, VeilError};
use serde::Deserialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// File logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Enable JSON file logging in addition to console output
    #[serde(default)]
    pub file_enabled: bool,

    /// Directory for rotated log files
    #[serde(default = "default_log_path")]
    pub file_path: String,

    /// Rotation schedule: "daily" or "hourly"
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_path() -> String {
    "logs".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file_enabled: false,
            file_path: default_log_path(),
            rotation: default_rotation(),
        }
    }
}

/// Guard that must be kept alive for the duration of the program
/// to ensure logs are flushed properly
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            _file_guard: file_guard,
        }
    }
}

/// Initialize the logging system.
///
/// Returns a [`LoggingGuard`] that must be kept alive for the duration of
/// the program. `RUST_LOG` overrides `log_level_str` when set.
pub fn init_logging(log_level_str: &str, settings: &LoggingSettings) -> Result<LoggingGuard> {
    let log_level = parse_log_level(log_level_str)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("veil={log_level}")));

    let mut layers = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter.clone());
    layers.push(console_layer.boxed());

    let file_guard = if settings.file_enabled {
        let rotation = match settings.rotation.as_str() {
            "hourly" => Rotation::HOURLY,
            _ => Rotation::DAILY,
        };

        std::fs::create_dir_all(&settings.file_path).map_err(|e| {
            VeilError::Configuration(format!(
                "Failed to create log directory {}: {}",
                settings.file_path, e
            ))
        })?;

        let file_appender = RollingFileAppender::new(rotation, &settings.file_path, "veil.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(non_blocking)
            .with_filter(env_filter);
        layers.push(file_layer.boxed());
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry().with(layers).init();

    tracing::info!(
        file_enabled = settings.file_enabled,
        file_path = %settings.file_path,
        "Logging initialized"
    );

    Ok(LoggingGuard::new(file_guard))
}

fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(VeilError::Configuration(format!(
            "Invalid log level: {level_str}. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

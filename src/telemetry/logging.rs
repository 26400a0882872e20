//! Tracing subscriber setup for the controller process.
//!
//! `RUST_LOG` overrides the configured level. Unknown level or format names
//! fall back to `info` and pretty output; `config validate` reports them.

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Layout of emitted log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human oriented
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event, span closes included
    Json,
}

impl LogFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// The `[logging]` section of config.toml
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug or trace (any case)
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogConfig {
    /// Configured level, `None` if the name is not a level
    pub fn level(&self) -> Option<Level> {
        match self.level.to_lowercase().as_str() {
            "error" => Some(Level::ERROR),
            "warn" => Some(Level::WARN),
            "info" => Some(Level::INFO),
            "debug" => Some(Level::DEBUG),
            "trace" => Some(Level::TRACE),
            _ => None,
        }
    }

    /// Configured format, `None` if the name is not a format
    pub fn format(&self) -> Option<LogFormat> {
        LogFormat::from_name(&self.format)
    }
}

/// Level and format the subscriber is built with
fn resolve(config: Option<&LogConfig>) -> (Level, LogFormat) {
    match config {
        Some(config) => (
            config.level().unwrap_or(Level::INFO),
            config.format().unwrap_or_default(),
        ),
        None => (Level::INFO, LogFormat::default()),
    }
}

fn format_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer();
    match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().with_span_events(FmtSpan::CLOSE).boxed(),
    }
}

/// Install the global subscriber
///
/// Later calls are no-ops.
pub fn init_logging(config: Option<&LogConfig>) {
    let (level, format) = resolve(config);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level.as_str())
    };

    let _ = tracing_subscriber::registry()
        .with(format_layer(format))
        .with(filter)
        .try_init();
}

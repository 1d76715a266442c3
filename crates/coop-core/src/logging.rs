use crate::{CoopError, CoopResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogWriter {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error. Required whenever stdout carries protocol frames.
    Stderr,
}

/// Logging configuration, passed explicitly by the process entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level for every target (`trace`..`error`).
    #[serde(default = "default_level")]
    pub level: String,
    /// Extra per-target directives, e.g. `coop_mcp=debug`.
    #[serde(default)]
    pub directives: Vec<String>,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Output stream.
    #[serde(default)]
    pub writer: LogWriter,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directives: Vec::new(),
            format: LogFormat::default(),
            writer: LogWriter::default(),
        }
    }
}

impl LogConfig {
    /// The filter directive string (`level,target=level,...`).
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.as_str())
            .chain(self.directives.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Build the `EnvFilter` described by this config.
    pub fn filter(&self) -> CoopResult<EnvFilter> {
        EnvFilter::try_new(self.filter_directives())
            .map_err(|e| CoopError::Config(format!("Invalid log filter: {e}")))
    }
}

/// Install the global tracing subscriber. Call once, from `main`.
pub fn init(config: &LogConfig) -> CoopResult<()> {
    let filter = config.filter()?;
    let writer = match config.writer {
        LogWriter::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogWriter::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    result.map_err(|e| CoopError::Config(format!("Failed to install log subscriber: {e}")))
}

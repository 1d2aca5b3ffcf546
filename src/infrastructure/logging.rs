//! Logging setup on top of `tracing`
//!
//! The library itself only emits events (targets `ffi`, `hooks`, `memory`,
//! `config`); installing a subscriber is left to the embedding binary. The
//! CLI uses [`init_logging`] with the `[logging]` section of its config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line
    #[default]
    Pretty,
    /// One line per event
    Compact,
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rotated files `<directory>/<prefix>.<date>`
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra filter directives, e.g. `"ffi=trace,hooks=debug"`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(writer: W, config: &LogConfig) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let spans = span_events_config(config.span_events);
    match config.format {
        LogFormat::Pretty => fmt::layer().with_writer(writer).pretty().with_span_events(spans).boxed(),
        LogFormat::Compact => fmt::layer().with_writer(writer).compact().with_span_events(spans).boxed(),
        LogFormat::Json => fmt::layer().with_writer(writer).json().with_span_events(spans).boxed(),
    }
}

/// Install the global subscriber
///
/// Keep the returned guard alive until exit so buffered events are flushed.
/// Returns `None` when a subscriber was already installed.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config);

    let (layer, guard) = match &config.output {
        LogOutput::Stdout => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (format_layer(writer, &config), guard)
        }
        LogOutput::Stderr => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (format_layer(writer, &config), guard)
        }
        LogOutput::File { directory, prefix } => {
            let appender = rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (format_layer(writer, &config), guard)
        }
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .ok()
        .map(|_| guard)
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .fold(base, |filter, directive| match directive.parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => {
                    tracing::warn!("Invalid filter directive: {}", directive);
                    filter
                }
            }),
        None => base,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Parse a level name (`trace` .. `error`)
pub fn parse_level(name: &str) -> Option<Level> {
    name.parse().ok()
}

/// Verbose stderr logging with every interop target at trace
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("ffi=trace,hooks=trace,memory=trace".to_string()),
    })
}

/// JSON logs into daily-rotated files under `log_dir`
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "binutils".to_string(),
        },
        span_events: false,
        filter: Some("ffi=info,hooks=info".to_string()),
    })
}

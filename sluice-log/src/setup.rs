use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// All crates of the workspace that receive the configured log level.
///
/// Third-party crates are capped at `INFO`.
const CRATE_NAMES: &[&str] = &[
    "sluice",
    "sluice_append",
    "sluice_common",
    "sluice_config",
    "sluice_identity",
    "sluice_labels",
    "sluice_log",
    "sluice_relabel",
    "sluice_remote",
    "sluice_statsd",
    "sluice_test",
];

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  sluice_remote::queue: starting queue manager destination=primary shards=1
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-12-04T12:10:32.123Z  INFO sluice_remote::queue: starting queue manager destination=primary shards=1
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-12-04T12:11:08.729716Z","level":"INFO","target":"sluice_remote::queue","message":"starting queue manager"}
    /// ```
    Json,
}

/// The minimum level of log messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Disables logging.
    Off,
    /// Only errors.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages and above.
    Info,
    /// Debug messages and above.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Returns the equivalent `tracing` level filter.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for sluice.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Auto,
        }
    }
}

/// Builds the filter used when `RUST_LOG` is not set.
fn default_filter(level: LevelFilter) -> EnvFilter {
    let mut directives = level.min(LevelFilter::INFO).to_string();
    for name in CRATE_NAMES {
        directives.push_str(&format!(",{name}={level}"));
    }

    EnvFilter::new(directives)
}

/// Initialize the logging system.
///
/// Subsequent calls are ignored, the first initialization wins.
///
/// # Example
///
/// ```
/// let log_config = sluice_log::LogConfig {
///     level: sluice_log::LogLevel::Debug,
///     ..Default::default()
/// };
///
/// sluice_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(config.level.level_filter()));

    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) => LogFormat::Pretty,
        (LogFormat::Auto, false) => LogFormat::Simplified,
        (format, _) => format,
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Simplified => fmt::layer().with_ansi(false).with_target(true).boxed(),
        LogFormat::Pretty | LogFormat::Auto => {
            fmt::layer().with_ansi(true).with_target(true).compact().boxed()
        }
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .ok();
}

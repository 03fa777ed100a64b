//! Logging configuration and initialization
//!
//! The ingestion binary installs its `tracing` subscriber through
//! [`init_logging`]. Lines go to stdout, to a file rolled daily under
//! `log_dir`, or to both; `SJ_LOG_FORMAT=json` switches every layer to JSON.
//!
//! Engine code logs with structured fields rather than interpolated strings:
//!
//! ```rust
//! use tracing::{info, warn};
//!
//! let set_id = "20190101_120000";
//! info!(set_id, rows = 120, "Loaded primary records");
//! warn!(set_id, role = "promo", "Set is incomplete, skipping");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sj_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::for_tool("sj-ingest", false)?;
//!     let _guard = init_logging(&config)?;
//!
//!     info!("Application started");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,

    /// Directory for log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// Log file name prefix, e.g. "sj-ingest" -> "sj-ingest.2019-08-01"
    pub log_file_prefix: String,

    /// Extra filter directives, e.g. "sqlx=warn,sj_ingest=debug"
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "sj".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Console logging for a command-line tool: `debug` when verbose,
    /// `info` otherwise, then any `SJ_LOG_*` overrides
    pub fn for_tool(prefix: &str, verbose: bool) -> Result<Self> {
        let level = if verbose { LogLevel::Debug } else { LogLevel::Info };
        Self::builder()
            .level(level)
            .log_file_prefix(prefix)
            .filter_directives("sqlx=warn")
            .build()
            .merge_env()
    }

    /// Overlay the environment onto this configuration
    ///
    /// | variable              | values                          |
    /// |-----------------------|---------------------------------|
    /// | `SJ_LOG_LEVEL`        | trace, debug, info, warn, error |
    /// | `SJ_LOG_OUTPUT`       | console, file, both             |
    /// | `SJ_LOG_FORMAT`       | text, json                      |
    /// | `SJ_LOG_DIR`          | directory for log files         |
    /// | `SJ_LOG_FILE_PREFIX`  | log file name prefix            |
    /// | `SJ_LOG_FILTER`       | extra filter directives         |
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(level) = env_setting("SJ_LOG_LEVEL")? {
            self.level = level;
        }
        if let Some(output) = env_setting("SJ_LOG_OUTPUT")? {
            self.output = output;
        }
        if let Some(format) = env_setting("SJ_LOG_FORMAT")? {
            self.format = format;
        }
        if let Ok(dir) = std::env::var("SJ_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("SJ_LOG_FILE_PREFIX") {
            self.log_file_prefix = prefix;
        }
        if let Ok(filter) = std::env::var("SJ_LOG_FILTER") {
            self.filter_directives = Some(filter);
        }
        Ok(self)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }
}

/// Builder for LogConfig
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

fn env_setting<T>(var: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    match std::env::var(var) {
        Ok(raw) => raw.parse().map(Some).with_context(|| format!("{} is invalid", var)),
        Err(_) => Ok(None),
    }
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
            filter = filter.add_directive(
                directive
                    .trim()
                    .parse::<Directive>()
                    .with_context(|| format!("Failed to parse filter directive '{}'", directive))?,
            );
        }
    }

    Ok(filter)
}

/// Initialize the global subscriber.
///
/// Call once at startup. When file output is enabled the returned guard must
/// be held until exit, otherwise buffered lines are lost.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;
    let json = config.format == LogFormat::Json;

    let console_layer = config.output.console().then(|| {
        let layer = fmt::layer().with_writer(std::io::stdout).with_target(true);
        if json {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    });

    let (file_layer, guard) = if config.output.file() {
        std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
        let layer = if json { layer.json().boxed() } else { layer.boxed() };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_output_targets() {
        assert!(LogOutput::Both.console() && LogOutput::Both.file());
        assert!(!LogOutput::Console.file());
        assert_eq!("stdout".parse::<LogOutput>().unwrap(), LogOutput::Console);
    }

    #[test]
    fn test_config_builder() {
        let config = LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::File)
            .format(LogFormat::Json)
            .log_dir("/var/log/sj")
            .log_file_prefix("sj-ingest")
            .build();

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.output, LogOutput::File);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/sj"));
        assert_eq!(config.log_file_prefix, "sj-ingest");
    }

    #[test]
    #[serial]
    fn test_merge_env_overrides_builder() {
        std::env::set_var("SJ_LOG_LEVEL", "error");
        std::env::set_var("SJ_LOG_FILE_PREFIX", "from-env");

        let config = LogConfig::builder()
            .level(LogLevel::Debug)
            .log_file_prefix("sj-ingest")
            .build()
            .merge_env()
            .unwrap();

        std::env::remove_var("SJ_LOG_LEVEL");
        std::env::remove_var("SJ_LOG_FILE_PREFIX");

        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.log_file_prefix, "from-env");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_names_variable() {
        std::env::set_var("SJ_LOG_OUTPUT", "printer");
        let err = LogConfig::default().merge_env().unwrap_err();
        std::env::remove_var("SJ_LOG_OUTPUT");

        assert!(err.to_string().contains("SJ_LOG_OUTPUT"));
    }

    #[test]
    #[serial]
    fn test_tool_defaults() {
        let config = LogConfig::for_tool("sj-ingest", true).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.filter_directives.as_deref(), Some("sqlx=warn"));
    }

    #[test]
    fn test_bad_filter_directive_is_reported() {
        let config = LogConfig::builder().filter_directives("sqlx=notalevel").build();
        assert!(build_filter(&config).is_err());
    }
}

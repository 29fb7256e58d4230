//! Logging configuration and initialization
//!
//! Every SheetSync binary installs one global `tracing` subscriber through
//! [`init_logging`]. Output goes to the console, to a daily rolling file, or
//! both, as human-readable text or JSON lines.
//!
//! Library code logs with the `tracing` macros and structured fields:
//!
//! ```rust
//! use tracing::{info, warn};
//!
//! let profile = "sftp-clientes";
//! let file = "orders_2024.xlsx";
//! info!(profile = %profile, file = %file, "downloaded");
//! warn!(profile = %profile, "archive move not supported");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sheetsync_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env().unwrap_or_default();
//! let _guard = init_logging(&config).expect("logging");
//! tracing::info!("sheetsync started");
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Minimum severity that reaches the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    #[serde(alias = "stdout")]
    Console,
    File,
    #[serde(alias = "all")]
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

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    #[serde(alias = "pretty")]
    Text,
    Json,
}

/// Parse one setting value through its serde name, ignoring case and padding
fn parse_setting<T: DeserializeOwned>(name: &str, raw: &str) -> Result<T> {
    let value = serde_json::Value::String(raw.trim().to_lowercase());
    serde_json::from_value(value).with_context(|| format!("Invalid {}: {}", name, raw.trim()))
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,

    /// Directory for rolling log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// File name prefix, e.g. "sheetsync" -> "sheetsync.2024-01-18"
    pub log_file_prefix: String,

    /// Extra directives such as "ssh2=warn,suppaftp=info"
    pub filter_directives: Option<String>,

    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "sheetsync".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// Defaults overridden by the `LOG_*` environment variables
    ///
    /// Recognized: `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`,
    /// `LOG_FILE_PREFIX`, `LOG_FILTER`, `LOG_INCLUDE_LOCATION`,
    /// `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`. Empty values are
    /// treated as unset.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Apply the `LOG_*` environment variables over this configuration
    pub fn merge_env(self) -> Result<Self> {
        self.merge_from(|name| std::env::var(name).ok())
    }

    fn merge_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = var("LOG_LEVEL") {
            self.level = parse_setting("LOG_LEVEL", &raw)?;
        }
        if let Some(raw) = var("LOG_OUTPUT") {
            self.output = parse_setting("LOG_OUTPUT", &raw)?;
        }
        if let Some(raw) = var("LOG_FORMAT") {
            self.format = parse_setting("LOG_FORMAT", &raw)?;
        }
        if let Some(raw) = var("LOG_DIR") {
            self.log_dir = PathBuf::from(raw);
        }
        if let Some(raw) = var("LOG_FILE_PREFIX") {
            self.log_file_prefix = raw;
        }
        if let Some(raw) = var("LOG_FILTER") {
            self.filter_directives = Some(raw);
        }
        for (name, flag) in [
            ("LOG_INCLUDE_LOCATION", &mut self.include_location),
            ("LOG_INCLUDE_THREAD_IDS", &mut self.include_thread_ids),
            ("LOG_INCLUDE_TARGETS", &mut self.include_targets),
        ] {
            if let Some(raw) = var(name) {
                *flag = raw
                    .trim()
                    .to_lowercase()
                    .parse()
                    .with_context(|| format!("Invalid {}: {}", name, raw.trim()))?;
            }
        }

        Ok(self)
    }

    /// `RUST_LOG` first, then the configured level, then extra directives
    fn filter(&self) -> Result<EnvFilter> {
        let base = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .from_env_lossy();

        self.filter_directives
            .iter()
            .flat_map(|d| d.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .try_fold(base, |filter, directive| -> Result<EnvFilter> {
                let parsed = directive
                    .parse::<Directive>()
                    .with_context(|| format!("Bad log filter directive '{}'", directive))?;
                Ok(filter.add_directive(parsed))
            })
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(self.include_targets)
            .with_thread_ids(self.include_thread_ids)
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_span_events(FmtSpan::CLOSE);

        match self.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

/// Builder for [`LogConfig`]; fields not set keep their defaults
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

    /// Rolling file name stem, e.g. "sheetsync" gives "sheetsync.2024-01-18"
    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Keeps the non-blocking file writer flushing until dropped
///
/// Hold it for the lifetime of `main`.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let filter = config.filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if config.output.console() {
        layers.push(config.layer(std::io::stdout, true));
    }

    if config.output.file() {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("Cannot create log directory {}", config.log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(config.layer(writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LogGuard { _file: file_guard })
}

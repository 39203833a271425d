//! Logging configuration resolved from `PMS_LOG`, `RUST_LOG`,
//! `PMS_LOG_FORMAT` and command-line flags (in increasing precedence).

use serde::{Deserialize, Serialize};

pub const ENV_LOG_LEVEL: &str = "PMS_LOG";
pub const ENV_LOG_FORMAT: &str = "PMS_LOG_FORMAT";

/// Where log lines go and what they look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Console lines for people.
    #[default]
    Human,
    /// One JSON object per event.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "text" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            other => Err(format!("unknown log format '{other}' (expected human or jsonl)")),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        })
    }
}

/// Minimum severity that reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Map `-v` counts and `-q` onto a level, starting from `base`.
    pub fn from_verbosity(base: LogLevel, verbose: u8, quiet: bool) -> LogLevel {
        if quiet {
            return LogLevel::Error;
        }
        match verbose {
            0 => base,
            1 => base.min(LogLevel::Debug),
            _ => LogLevel::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" => Ok(LogLevel::Off),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        })
    }
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        use tracing_subscriber::filter::LevelFilter;
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Prefix human lines with a timestamp.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Warn,
            timestamps: false,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment, then apply CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::resolve(
            std::env::var(ENV_LOG_LEVEL).ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
            std::env::var(ENV_LOG_FORMAT).ok().as_deref(),
            cli_level,
            cli_format,
        )
    }

    fn resolve(
        pms_log: Option<&str>,
        rust_log: Option<&str>,
        pms_log_format: Option<&str>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let mut config = LogConfig::default();

        if let Some(level) = pms_log.and_then(|v| v.parse().ok()) {
            config.level = level;
        } else if let Some(level) = rust_log.and_then(level_from_directives) {
            config.level = level;
        }
        if let Some(format) = pms_log_format.and_then(|v| v.parse().ok()) {
            config.format = format;
        }

        if let Some(level) = cli_level {
            config.level = level;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }
        config
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }
}

/// Most verbose level named in a `RUST_LOG`-style directive list, e.g.
/// `warn,pms_core=debug` yields `debug`.
fn level_from_directives(directives: &str) -> Option<LogLevel> {
    directives
        .split(',')
        .filter_map(|d| d.rsplit('=').next())
        .filter_map(|lvl| lvl.parse::<LogLevel>().ok())
        .min()
}

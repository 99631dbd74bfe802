//! Logging setup
//!
//! Operations log to two places: a concise console on stderr (stdout is
//! reserved for command output such as `list --json`) and a daily file in
//! `global.log_directory`. The file appender prunes itself to
//! `global.log_max_files`.
//!
//! Orchestration events carry `backup_id`, `database`, `storage` and `kind`
//! as structured fields, which the file layer keeps verbatim.

use crate::config::{expand_tilde, GlobalConfig};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "backyard-backup";
const LOG_FILE_SUFFIX: &str = "log";

/// Crates whose INFO chatter drowns out backup progress
const QUIET_DEPENDENCIES: &[&str] = &["aws_config", "aws_smithy_runtime", "hyper", "reqwest", "rustls"];

/// Where and how much to log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub log_directory: PathBuf,
    /// Level of the file layer; the console stays at INFO
    pub file_level: Level,
    /// Daily files kept, including today's
    pub max_files: usize,
}

impl LoggingConfig {
    /// Settings from the `[global]` section. Unknown level names fall back to INFO.
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            log_directory: expand_tilde(&global.log_directory),
            file_level: parse_level(&global.log_level).unwrap_or(Level::INFO),
            max_files: global.log_max_files.max(1) as usize,
        }
    }
}

/// Parse a configured level name; accepts `warning` as an alias for `warn`
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "warning" => Some(Level::WARN),
        other => Level::from_str(other).ok(),
    }
}

/// Keeps the background file writer alive; dropping it flushes pending lines
pub struct LogGuard {
    _file_guard: WorkerGuard,
}

/// Install the console and file layers as the global subscriber.
///
/// `RUST_LOG` overrides both filters when set.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    fs::create_dir_all(&config.log_directory)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_directory))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(config.max_files)
        .build(&config.log_directory)
        .with_context(|| format!("Failed to open log file in {:?}", config.log_directory))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter_for(config.file_level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(filter_for(Level::INFO));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global logger is already installed")?;

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Console-only logging for commands that run before a configuration is loaded
pub fn init_console_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter_for(Level::INFO))
        .with_target(false)
        .without_time()
        .try_init();
}

fn filter_for(level: Level) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut filter = EnvFilter::default().add_directive(LevelFilter::from_level(level).into());
    for krate in QUIET_DEPENDENCIES {
        if let Ok(directive) = format!("{}=warn", krate).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

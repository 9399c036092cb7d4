//! `tracing` subscriber for the `cv` binary.
//!
//! The level comes from `--log-level`, else `CMDVAULT_LOG`, else `warn`.
//! Events go to stderr; stdout carries command output only.

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing_subscriber::fmt;

pub const LOG_ENV: &str = "CMDVAULT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    #[value(alias = "warning")]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse a level name the way the `--log-level` flag does, ignoring case.
    fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name.trim(), true).ok()
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = cli_level
        .or_else(|| std::env::var(LOG_ENV).ok().and_then(|s| LogLevel::from_name(&s)))
        .unwrap_or(LogLevel::Warn);

    fmt()
        .with_max_level(tracing::Level::from(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {}", e))
}

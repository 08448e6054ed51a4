//! Structured logging.
//!
//! # Responsibilities
//! - Define the [`Logger`] capability used by the lifecycle core
//! - Forward log records to `tracing` with structured context
//! - Initialize the subscriber for the binary
//!
//! # Design Decisions
//! - Four severity levels, each with optional key/value context
//! - Logging never fails and never returns a value
//! - Minimum level adjustable at runtime

use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// True when a record at `self` passes a `minimum` filter.
    pub fn allows(self, minimum: LogLevel) -> bool {
        self >= minimum
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Key/value pairs attached to a log record.
pub type LogContext<'a> = &'a [(&'static str, &'a dyn fmt::Display)];

/// Logging capability consumed by the client, server and lifecycle.
pub trait Logger: Send + Sync {
    /// Emit one record. Implementations must not panic.
    fn log(&self, level: LogLevel, message: &str, context: LogContext<'_>);

    fn debug(&self, message: &str, context: LogContext<'_>) {
        self.log(LogLevel::Debug, message, context);
    }

    fn info(&self, message: &str, context: LogContext<'_>) {
        self.log(LogLevel::Info, message, context);
    }

    fn warn(&self, message: &str, context: LogContext<'_>) {
        self.log(LogLevel::Warn, message, context);
    }

    fn error(&self, message: &str, context: LogContext<'_>) {
        self.log(LogLevel::Error, message, context);
    }
}

/// Default [`Logger`] forwarding to `tracing`.
#[derive(Debug)]
pub struct TracingLogger {
    min_level: AtomicU8,
}

impl TracingLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level: AtomicU8::new(min_level as u8),
        }
    }

    /// Logger honoring the configured `log_level`.
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self::new(config.log_level)
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, context: LogContext<'_>) {
        if !level.allows(self.level()) {
            return;
        }
        let context = render_context(context);
        match level {
            LogLevel::Debug => tracing::debug!(context = %context, "{}", message),
            LogLevel::Info => tracing::info!(context = %context, "{}", message),
            LogLevel::Warn => tracing::warn!(context = %context, "{}", message),
            LogLevel::Error => tracing::error!(context = %context, "{}", message),
        }
    }
}

/// Render context pairs as `key=value` separated by spaces.
pub fn render_context(context: LogContext<'_>) -> String {
    let mut out = String::new();
    for (i, (key, value)) in context.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{key}={value}");
    }
    out
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: LogLevel) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tls_lifecycle={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filtering() {
        assert!(LogLevel::Error.allows(LogLevel::Debug));
        assert!(LogLevel::Info.allows(LogLevel::Info));
        assert!(!LogLevel::Debug.allows(LogLevel::Info));
        assert!(!LogLevel::Warn.allows(LogLevel::Error));
    }

    #[test]
    fn level_is_adjustable() {
        let logger = TracingLogger::default();
        assert_eq!(logger.level(), LogLevel::Info);
        logger.set_level(LogLevel::Error);
        assert_eq!(logger.level(), LogLevel::Error);
        // filtered records are dropped silently
        logger.debug("dropped", &[]);
    }

    #[test]
    fn configured_level_reaches_logger() {
        let config = ObservabilityConfig {
            log_level: LogLevel::Debug,
            ..ObservabilityConfig::default()
        };
        assert_eq!(TracingLogger::from_config(&config).level(), LogLevel::Debug);
    }

    #[test]
    fn parses_level_names() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn renders_context_pairs() {
        let port = 8443;
        let host = "localhost";
        assert_eq!(
            render_context(&[("host", &host), ("port", &port)]),
            "host=localhost port=8443"
        );
        assert_eq!(render_context(&[]), "");
    }
}

//! Injectable logging capability.
//!
//! Runtime components never call a global logger directly; they receive an
//! `Arc<dyn Logger>` at construction. Level filtering is the logger's own
//! business: callers may ask [`Logger::enabled`] before doing expensive
//! formatting work, but never branch on the logger otherwise.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Structured-ish logging sink.
///
/// Only [`Logger::log`] is required. Messages are passed as
/// `fmt::Arguments` so disabled levels cost nothing to skip.
pub trait Logger: Send + Sync {
    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }

    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>);

    fn debug(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Debug) {
            self.log(LogLevel::Debug, args);
        }
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Info) {
            self.log(LogLevel::Info, args);
        }
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Warn) {
            self.log(LogLevel::Warn, args);
        }
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Error) {
            self.log(LogLevel::Error, args);
        }
    }
}

/// Forwards to `tracing`, tagging every event with a component name.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    component: String,
}

impl TracingLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("batchline")
    }
}

impl Logger for TracingLogger {
    fn enabled(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Debug => ::tracing::enabled!(::tracing::Level::DEBUG),
            LogLevel::Info => ::tracing::enabled!(::tracing::Level::INFO),
            LogLevel::Warn => ::tracing::enabled!(::tracing::Level::WARN),
            LogLevel::Error => ::tracing::enabled!(::tracing::Level::ERROR),
        }
    }

    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let component = self.component.as_str();
        match level {
            LogLevel::Debug => ::tracing::debug!(component, "{}", args),
            LogLevel::Info => ::tracing::info!(component, "{}", args),
            LogLevel::Warn => ::tracing::warn!(component, "{}", args),
            LogLevel::Error => ::tracing::error!(component, "{}", args),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn enabled(&self, _level: LogLevel) -> bool {
        false
    }

    fn log(&self, _level: LogLevel, _args: fmt::Arguments<'_>) {}
}

/// Keeps every record in memory (tests, diagnostics endpoints).
#[derive(Debug, Default)]
pub struct MemoryLogger {
    min_level: Option<LogLevel>,
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only keep records at `level` or above.
    pub fn with_min_level(level: LogLevel) -> Self {
        Self {
            min_level: Some(level),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records at exactly `level`.
    pub fn at(&self, level: LogLevel) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, text)| text)
            .collect()
    }

    /// Whether any record at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.at(level).iter().any(|text| text.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn enabled(&self, level: LogLevel) -> bool {
        self.min_level.is_none_or(|min| level >= min)
    }

    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, args.to_string()));
    }
}

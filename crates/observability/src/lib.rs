//! Tracing setup and the injectable logging capability.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing subscriber configuration (filters, formatting).
pub mod tracing;

/// Logging capability injected into schedulers.
pub mod logging;

pub use logging::{LogLevel, Logger, MemoryLogger, NoopLogger, TracingLogger};

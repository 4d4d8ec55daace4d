//! Flush readiness policy: size OR age, never for an empty buffer.

use std::time::Duration;

use batchline_core::BatchConfig;

/// Why a flush happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlushReason {
    /// Buffer reached `batch_size`.
    Size,
    /// `timeout` elapsed since the last flush.
    Timeout,
    /// Caller asked for it (shutdown drain, manual flush).
    Forced,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Timeout => "timeout",
            FlushReason::Forced => "forced",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FlushTrigger {
    batch_size: usize,
    timeout: Duration,
}

impl FlushTrigger {
    pub fn new(batch_size: usize, timeout: Duration) -> Self {
        Self {
            batch_size,
            timeout,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.batch_size, config.timeout())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reason to flush `pending` items that have waited `since_last_flush`,
    /// if any. Size wins over timeout when both hold.
    pub fn check(&self, pending: usize, since_last_flush: Duration) -> Option<FlushReason> {
        if pending == 0 {
            return None;
        }
        if pending >= self.batch_size {
            return Some(FlushReason::Size);
        }
        if since_last_flush >= self.timeout {
            return Some(FlushReason::Timeout);
        }
        None
    }

    pub fn is_ready(&self, pending: usize, since_last_flush: Duration) -> bool {
        self.check(pending, since_last_flush).is_some()
    }
}

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Running counters for one scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Messages handed to the scheduler.
    pub received: u64,
    /// Messages refused by the decoder or validator.
    pub rejected: u64,
    pub flushes: u64,
    pub items_flushed: u64,
    /// Handler calls that returned a batch-level error.
    pub handler_errors: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub resubmit_failures: u64,
    pub dead_letter_failures: u64,
}

/// Shared, lock-protected [`BatchStats`].
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStats(Arc<Mutex<BatchStats>>);

impl SharedStats {
    pub(crate) fn record(&self, update: impl FnOnce(&mut BatchStats)) {
        let mut stats = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut stats);
    }

    pub(crate) fn snapshot(&self) -> BatchStats {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

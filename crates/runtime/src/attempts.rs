//! Per-message retry counting, carried in the message's own attributes.

use batchline_core::{Attributes, BatchConfig};

/// What to do with an item the batch handler reported as failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Resubmit; `attempt` has been written back into the attributes.
    Retry { attempt: u32 },
    /// Retry budget exhausted; attributes were left untouched.
    DeadLetter { attempts: u32 },
}

/// Reads, increments and writes back the retry counter.
///
/// Counter seed when the attribute cannot be read:
/// - a message with no attributes at all starts at `0`;
/// - a message with attributes but no parseable counter starts at `1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTracker {
    key: String,
    limit: u32,
}

impl AttemptTracker {
    pub fn new(key: impl Into<String>, limit: u32) -> Self {
        Self {
            key: key.into(),
            limit,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.retry_count_key(), config.limit_retry)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Failures already recorded on this message.
    pub fn observed(&self, attributes: &Attributes) -> u32 {
        if attributes.is_empty() {
            return 0;
        }
        attributes
            .get(&self.key)
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(1)
    }

    /// Count one more failure and decide the item's fate.
    pub fn record_failure(&self, attributes: &mut Attributes) -> Disposition {
        let attempt = self.observed(attributes).saturating_add(1);
        if attempt > self.limit {
            return Disposition::DeadLetter { attempts: attempt };
        }
        attributes.insert(self.key.clone(), attempt.to_string());
        Disposition::Retry { attempt }
    }
}

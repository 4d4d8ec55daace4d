//! In-memory dead-letter queue.
//!
//! Keeps the most recent abandoned items for inspection or manual replay.
//! Bounded: once full, the oldest entry is evicted and counted as dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchline_core::{Attributes, ConsumerResult};

use crate::sink::DeadLetterHandler;

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub data: Vec<u8>,
    pub attributes: Attributes,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(data: Vec<u8>, attributes: Attributes) -> Self {
        Self {
            data,
            attributes,
            dead_lettered_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    capacity: usize,
    total_captured: AtomicU64,
    total_dropped: AtomicU64,
}

impl DeadLetterQueue {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            total_captured: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetterEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, entry: DeadLetterEntry) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
        self.total_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the current entries, oldest first.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return every entry (e.g. for replay).
    pub fn drain(&self) -> Vec<DeadLetterEntry> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn total_captured(&self) -> u64 {
        self.total_captured.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl DeadLetterHandler for DeadLetterQueue {
    fn dead_letter(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        self.push(DeadLetterEntry::new(data.to_vec(), attributes.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_entries_in_order() {
        let dlq = DeadLetterQueue::default();
        dlq.dead_letter(b"a", &Attributes::new()).unwrap();
        dlq.dead_letter(b"b", &Attributes::new()).unwrap();

        let data: Vec<Vec<u8>> = dlq.entries().into_iter().map(|e| e.data).collect();
        assert_eq!(data, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(dlq.total_captured(), 2);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let dlq = DeadLetterQueue::new(2);
        for payload in [b"1", b"2", b"3"] {
            dlq.dead_letter(payload, &Attributes::new()).unwrap();
        }

        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.total_dropped(), 1);
        assert_eq!(dlq.entries()[0].data, b"2");
    }

    #[test]
    fn drain_empties_queue() {
        let dlq = DeadLetterQueue::new(10);
        dlq.dead_letter(b"x", &Attributes::new()).unwrap();

        assert_eq!(dlq.drain().len(), 1);
        assert!(dlq.is_empty());
        assert_eq!(dlq.total_captured(), 1);
    }
}

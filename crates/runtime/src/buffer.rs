//! Pending-message buffer plus its "last flush" watermark.
//!
//! The buffer itself is not synchronised; the owning scheduler keeps it
//! behind a single mutex and every read or write happens under that lock.

use std::time::Instant;

use batchline_core::Message;

use crate::trigger::{FlushReason, FlushTrigger};

#[derive(Debug)]
pub struct BatchBuffer<T> {
    items: Vec<Message<T>>,
    last_flush: Instant,
}

impl<T> BatchBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, Instant::now())
    }

    /// Buffer whose watermark starts at `last_flush` (tests, replay).
    pub fn starting_at(capacity: usize, last_flush: Instant) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            last_flush,
        }
    }

    pub fn push(&mut self, message: Message<T>) {
        self.items.push(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    pub fn items(&self) -> &[Message<T>] {
        &self.items
    }

    pub fn check(&self, trigger: &FlushTrigger, now: Instant) -> Option<FlushReason> {
        trigger.check(self.items.len(), now.saturating_duration_since(self.last_flush))
    }

    pub fn is_ready(&self, trigger: &FlushTrigger, now: Instant) -> bool {
        self.check(trigger, now).is_some()
    }

    /// Move the pending items out, keeping the allocation for the next batch.
    pub fn take_batch(&mut self) -> Vec<Message<T>> {
        self.items.drain(..).collect()
    }

    /// End-of-flush bookkeeping: empty buffer, watermark advanced to `now`.
    ///
    /// This is the only place the watermark moves.
    pub fn reset(&mut self, now: Instant) {
        self.items.clear();
        self.last_flush = now;
    }
}

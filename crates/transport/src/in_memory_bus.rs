//! In-memory message bus for tests and single-process pipelines.

use std::sync::{Mutex, mpsc};

use crate::bus::{MessageBus, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Publish failed due to internal lock poisoning.
    #[error("bus lock poisoned")]
    Poisoned,
    /// The bus was closed; nothing is accepted any more.
    #[error("bus closed")]
    Closed,
}

/// In-memory pub/sub bus.
///
/// - No IO
/// - Best-effort fan-out; dead subscribers are pruned on publish
/// - Can be closed, which disconnects every subscription
#[derive(Debug)]
pub struct InMemoryBus<M> {
    subscribers: Mutex<Option<Vec<mpsc::Sender<M>>>>,
}

impl<M> InMemoryBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disconnect all subscribers and refuse further publishes.
    pub fn close(&self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.take();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .ok()
            .and_then(|subs| subs.as_ref().map(Vec::len))
            .unwrap_or(0)
    }
}

impl<M> Default for InMemoryBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }
}

impl<M> MessageBus<M> for InMemoryBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = BusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut guard = self.subscribers.lock().map_err(|_| BusError::Poisoned)?;
        let subs = guard.as_mut().ok_or(BusError::Closed)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A closed or poisoned bus still hands out a subscription; it is
        // simply disconnected from the start.
        if let Ok(mut guard) = self.subscribers.lock() {
            if let Some(subs) = guard.as_mut() {
                subs.push(tx);
            }
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::Duration;

    #[test]
    fn fans_out_to_every_subscriber() {
        let bus = InMemoryBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(1u32).unwrap();
        bus.publish(2u32).unwrap();

        assert_eq!(a.try_recv(), Ok(1));
        assert_eq!(a.try_recv(), Ok(2));
        assert_eq!(b.try_recv(), Ok(1));
        assert_eq!(b.try_recv(), Ok(2));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish("x").unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.try_recv(), Ok("x"));
    }

    #[test]
    fn close_disconnects_and_rejects() {
        let bus = InMemoryBus::new();
        let sub = bus.subscribe();
        bus.close();

        assert_eq!(bus.publish(1u8), Err(BusError::Closed));
        assert_eq!(
            sub.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        );
    }
}

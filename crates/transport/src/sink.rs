//! Where failed items go: back to the broker, or to a dead-letter sink.

use tracing::error;

use batchline_core::{Attributes, ConsumerError, ConsumerResult};

use crate::bus::MessageBus;
use crate::delivery::Delivery;

/// Re-publishes a failed item so it is delivered again as a new message.
///
/// Typically "publish to the source queue" or "publish to a retry topic".
/// The attributes already carry the incremented retry counter.
pub trait RetryTransport: Send + Sync {
    fn resubmit(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()>;
}

/// Terminal sink for items that exhausted their retries.
pub trait DeadLetterHandler: Send + Sync {
    fn dead_letter(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()>;
}

impl<F> RetryTransport for F
where
    F: Fn(&[u8], &Attributes) -> ConsumerResult<()> + Send + Sync,
{
    fn resubmit(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        self(data, attributes)
    }
}

impl<F> DeadLetterHandler for F
where
    F: Fn(&[u8], &Attributes) -> ConsumerResult<()> + Send + Sync,
{
    fn dead_letter(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        self(data, attributes)
    }
}

/// [`RetryTransport`] that publishes a fresh [`Delivery`] onto a bus.
#[derive(Debug, Clone)]
pub struct Republish<B> {
    bus: B,
}

impl<B> Republish<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> RetryTransport for Republish<B>
where
    B: MessageBus<Delivery>,
{
    fn resubmit(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        let delivery = Delivery::new(data.to_vec(), attributes.clone()).with_generated_id();
        self.bus
            .publish(delivery)
            .map_err(|e| ConsumerError::transport(format!("republish failed: {e:?}")))
    }
}

impl<B> DeadLetterHandler for Republish<B>
where
    B: MessageBus<Delivery>,
{
    fn dead_letter(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        let delivery = Delivery::new(data.to_vec(), attributes.clone()).with_generated_id();
        self.bus
            .publish(delivery)
            .map_err(|e| ConsumerError::transport(format!("dead-letter publish failed: {e:?}")))
    }
}

/// Dead-letter sink that only logs the abandoned item.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDeadLetter;

impl DeadLetterHandler for LogDeadLetter {
    fn dead_letter(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        error!(
            payload = %String::from_utf8_lossy(data),
            attributes = ?attributes,
            "message dead-lettered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::in_memory_bus::InMemoryBus;

    #[test]
    fn republish_creates_new_delivery_with_attributes() {
        let bus = Arc::new(InMemoryBus::<Delivery>::new());
        let sub = bus.subscribe();
        let transport = Republish::new(bus.clone());

        let mut attrs = Attributes::new();
        attrs.insert("retryCount".to_string(), "2".to_string());
        transport.resubmit(b"payload", &attrs).unwrap();

        let delivery = sub.try_recv().unwrap();
        assert_eq!(delivery.data(), b"payload");
        assert_eq!(delivery.attributes(), &attrs);
        assert!(delivery.id().is_some());
    }

    #[test]
    fn republish_reports_closed_bus() {
        let bus = Arc::new(InMemoryBus::<Delivery>::new());
        bus.close();
        let transport = Republish::new(bus);

        let err = transport.resubmit(b"x", &Attributes::new()).unwrap_err();
        assert!(matches!(err, ConsumerError::Transport(_)));
    }

    #[test]
    fn closures_are_sinks() {
        let sink = |data: &[u8], _attrs: &Attributes| -> ConsumerResult<()> {
            if data.is_empty() {
                Err(ConsumerError::transport("empty"))
            } else {
                Ok(())
            }
        };

        assert!(sink.resubmit(b"a", &Attributes::new()).is_ok());
        assert!(DeadLetterHandler::dead_letter(&sink, b"", &Attributes::new()).is_err());
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use batchline_core::{Attributes, Message};

/// Raw unit handed over by a broker consumer loop: payload plus headers.
///
/// This is what travels on a [`MessageBus`](crate::MessageBus) and what sinks
/// receive back. It becomes a [`Message`] once it enters a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    id: Option<String>,
    data: Vec<u8>,
    #[serde(default)]
    attributes: Attributes,
}

impl Delivery {
    pub fn new(data: impl Into<Vec<u8>>, attributes: Attributes) -> Self {
        Self {
            id: None,
            data: data.into(),
            attributes,
        }
    }

    /// Delivery without any headers.
    pub fn bare(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, Attributes::new())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Assign a fresh time-ordered id, the way a broker would on publish.
    pub fn with_generated_id(self) -> Self {
        self.with_id(Uuid::now_v7().to_string())
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn into_message<T>(self) -> Message<T> {
        let message = Message::new(self.data).with_attributes(self.attributes);
        match self.id {
            Some(id) => message.with_id(id),
            None => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_message_keeping_metadata() {
        let mut attrs = Attributes::new();
        attrs.insert("retryCount".to_string(), "2".to_string());

        let msg: Message<()> = Delivery::new(b"abc".to_vec(), attrs).with_id("d-1").into_message();

        assert_eq!(msg.id.as_deref(), Some("d-1"));
        assert_eq!(msg.data, b"abc");
        assert_eq!(msg.attribute("retryCount"), Some("2"));
        assert!(msg.value.is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Delivery::bare("x").with_generated_id();
        let b = Delivery::bare("x").with_generated_id();
        assert!(a.id().is_some());
        assert_ne!(a.id(), b.id());
    }
}

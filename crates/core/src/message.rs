//! The unit flowing through a batching consumer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Broker headers carried alongside a payload. Order is irrelevant.
pub type Attributes = HashMap<String, String>;

/// A delivered message: an opaque payload plus mutable metadata.
///
/// - `data` is never touched after delivery; it is what gets resubmitted or
///   dead-lettered.
/// - `attributes` are rewritten in place on the retry path (retry counter).
/// - `value` is filled by the decoder before buffering and may stay `None`
///   when no decoder is configured.
///
/// A single `Message` must not be shared between concurrent retry attempts:
/// the executor owns it once the batch has been drained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<T> {
    /// Broker-assigned identifier, if the transport provides one.
    pub id: Option<String>,
    /// Raw wire payload.
    pub data: Vec<u8>,
    /// Broker headers.
    #[serde(default)]
    pub attributes: Attributes,
    /// Decoded domain object.
    pub value: Option<T>,
}

impl<T> Message<T> {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            data: data.into(),
            attributes: Attributes::new(),
            value: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Split into the raw `(data, attributes)` pair handed to sinks.
    pub fn into_raw(self) -> (Vec<u8>, Attributes) {
        (self.data, self.attributes)
    }
}

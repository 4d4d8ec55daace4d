//! User-supplied collaborators the scheduler calls into.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use batchline_core::{ConsumerError, ConsumerResult, Message};

/// Result of one batch-handler call.
///
/// `failed` holds indices into the batch that was passed in; only those items
/// are retried or dead-lettered. `error` is a batch-level failure: it is
/// logged, but items not listed in `failed` are still treated as succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub failed: Vec<usize>,
    pub error: Option<ConsumerError>,
}

impl BatchOutcome {
    /// Every item succeeded.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failed: indices.into_iter().collect(),
            error: None,
        }
    }

    pub fn error(error: ConsumerError) -> Self {
        Self {
            failed: Vec::new(),
            error: Some(error),
        }
    }

    pub fn with_error(mut self, error: ConsumerError) -> Self {
        self.error = Some(error);
        self
    }

    /// No failed items and no batch-level error.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.error.is_none()
    }
}

impl From<ConsumerResult<Vec<usize>>> for BatchOutcome {
    fn from(result: ConsumerResult<Vec<usize>>) -> Self {
        match result {
            Ok(failed) => Self::failed(failed),
            Err(err) => Self::error(err),
        }
    }
}

/// Persists a batch and reports which items failed.
///
/// Called repeatedly with disjoint batches; must not keep references to a
/// batch after returning. Runs while the scheduler's buffer lock is held, so
/// it must not call back into the same scheduler.
pub trait BatchHandler<T>: Send + Sync {
    fn handle(&self, batch: &[Message<T>]) -> BatchOutcome;
}

impl<T, F> BatchHandler<T> for F
where
    F: Fn(&[Message<T>]) -> BatchOutcome + Send + Sync,
{
    fn handle(&self, batch: &[Message<T>]) -> BatchOutcome {
        self(batch)
    }
}

/// Turns a raw payload into the item type before buffering.
pub trait Decoder<T>: Send + Sync {
    fn decode(&self, data: &[u8]) -> ConsumerResult<T>;
}

impl<T, F> Decoder<T> for F
where
    F: Fn(&[u8]) -> ConsumerResult<T> + Send + Sync,
{
    fn decode(&self, data: &[u8]) -> ConsumerResult<T> {
        self(data)
    }
}

/// serde_json decoder.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonDecoder")
    }
}

impl<T: DeserializeOwned> Decoder<T> for JsonDecoder<T> {
    fn decode(&self, data: &[u8]) -> ConsumerResult<T> {
        serde_json::from_slice(data).map_err(|e| ConsumerError::decode(e.to_string()))
    }
}

/// Checks (and may enrich) a message before it is buffered.
pub trait Validator<T>: Send + Sync {
    fn validate(&self, message: &mut Message<T>) -> ConsumerResult<()>;
}

impl<T, F> Validator<T> for F
where
    F: Fn(&mut Message<T>) -> ConsumerResult<()> + Send + Sync,
{
    fn validate(&self, message: &mut Message<T>) -> ConsumerResult<()> {
        self(message)
    }
}

/// Final disposition of a message that failed decoding or validation.
pub trait RejectHandler<T>: Send + Sync {
    fn reject(&self, message: Message<T>, error: &ConsumerError);
}

impl<T, F> RejectHandler<T> for F
where
    F: Fn(Message<T>, &ConsumerError) + Send + Sync,
{
    fn reject(&self, message: Message<T>, error: &ConsumerError) {
        self(message, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Order {
        id: u32,
    }

    #[test]
    fn json_decoder_parses_and_reports_errors() {
        let decoder = JsonDecoder::<Order>::new();
        assert_eq!(decoder.decode(br#"{"id": 4}"#).unwrap(), Order { id: 4 });
        assert!(matches!(decoder.decode(b"nope"), Err(ConsumerError::Decode(_))));
    }

    #[test]
    fn outcome_from_result() {
        let outcome: BatchOutcome = Ok(vec![1, 3]).into();
        assert_eq!(outcome.failed, vec![1, 3]);
        assert!(outcome.error.is_none());

        let outcome: BatchOutcome = Err(ConsumerError::handler("db down")).into();
        assert!(outcome.failed.is_empty());
        assert!(!outcome.is_clean());
        assert!(BatchOutcome::ok().is_clean());
    }

    #[test]
    fn closures_implement_collaborators() {
        let handler = |batch: &[Message<u8>]| BatchOutcome::failed(0..batch.len());
        let batch = vec![Message::new("a"), Message::new("b")];
        assert_eq!(handler.handle(&batch).failed, vec![0, 1]);

        let validator = |m: &mut Message<u8>| -> ConsumerResult<()> {
            if m.data.is_empty() {
                Err(ConsumerError::validation("empty payload"))
            } else {
                m.value = Some(m.data.len() as u8);
                Ok(())
            }
        };
        let mut msg = Message::new("abc");
        validator.validate(&mut msg).unwrap();
        assert_eq!(msg.value, Some(3));
    }
}

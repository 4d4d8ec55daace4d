//! Three ready-made [`BatchHandler`]s over one writer trait.
//!
//! All three drive the same scheduler; they differ only in what the writer
//! is handed for each message:
//!
//! - [`RawBatchHandler`]: the raw payload bytes;
//! - [`DecodedBatchHandler`]: the decoded value (messages without one fail);
//! - [`MapBatchHandler`]: the payload parsed as a JSON object (messages that
//!   don't parse fail).
//!
//! Writers report failures as indices into the slice *they* received; the
//! adapter maps them back to batch positions.

use serde_json::{Map, Value};

use batchline_core::{ConsumerError, ConsumerResult, Message};

use crate::handler::{BatchHandler, BatchOutcome};

pub type JsonObject = Map<String, Value>;

/// Persists a batch of records and returns the indices that failed.
///
/// An `Err` is a batch-level failure; items not also listed as failed are
/// treated as written.
pub trait BatchWriter<R: ?Sized>: Send + Sync {
    fn write(&self, records: &[&R]) -> ConsumerResult<Vec<usize>>;
}

impl<R, F> BatchWriter<R> for F
where
    R: ?Sized,
    F: Fn(&[&R]) -> ConsumerResult<Vec<usize>> + Send + Sync,
{
    fn write(&self, records: &[&R]) -> ConsumerResult<Vec<usize>> {
        self(records)
    }
}

#[derive(Debug, Clone)]
pub struct RawBatchHandler<W> {
    writer: W,
}

impl<W> RawBatchHandler<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<T, W> BatchHandler<T> for RawBatchHandler<W>
where
    W: BatchWriter<[u8]>,
{
    fn handle(&self, batch: &[Message<T>]) -> BatchOutcome {
        let records: Vec<&[u8]> = batch.iter().map(|m| m.data.as_slice()).collect();
        let positions: Vec<usize> = (0..batch.len()).collect();
        write_partial(&self.writer, &records, &positions, Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct DecodedBatchHandler<W> {
    writer: W,
}

impl<W> DecodedBatchHandler<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<T, W> BatchHandler<T> for DecodedBatchHandler<W>
where
    W: BatchWriter<T>,
{
    fn handle(&self, batch: &[Message<T>]) -> BatchOutcome {
        let mut records = Vec::with_capacity(batch.len());
        let mut positions = Vec::with_capacity(batch.len());
        let mut missing = Vec::new();

        for (i, message) in batch.iter().enumerate() {
            match message.value() {
                Some(value) => {
                    records.push(value);
                    positions.push(i);
                }
                None => missing.push(i),
            }
        }

        write_partial(&self.writer, &records, &positions, missing)
    }
}

#[derive(Debug, Clone)]
pub struct MapBatchHandler<W> {
    writer: W,
}

impl<W> MapBatchHandler<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<T, W> BatchHandler<T> for MapBatchHandler<W>
where
    W: BatchWriter<JsonObject>,
{
    fn handle(&self, batch: &[Message<T>]) -> BatchOutcome {
        let mut objects = Vec::with_capacity(batch.len());
        let mut positions = Vec::with_capacity(batch.len());
        let mut unparsed = Vec::new();

        for (i, message) in batch.iter().enumerate() {
            match serde_json::from_slice::<JsonObject>(&message.data) {
                Ok(object) => {
                    objects.push(object);
                    positions.push(i);
                }
                Err(_) => unparsed.push(i),
            }
        }

        let records: Vec<&JsonObject> = objects.iter().collect();
        write_partial(&self.writer, &records, &positions, unparsed)
    }
}

/// Call the writer and translate its record indices back to batch positions.
fn write_partial<R, W>(
    writer: &W,
    records: &[&R],
    positions: &[usize],
    mut failed: Vec<usize>,
) -> BatchOutcome
where
    R: ?Sized,
    W: BatchWriter<R> + ?Sized,
{
    if records.is_empty() {
        return BatchOutcome::failed(failed);
    }

    let (reported, error) = match writer.write(records) {
        Ok(reported) => (reported, None),
        Err(err) => (Vec::new(), Some(err)),
    };

    let mut unknown = Vec::new();
    for index in reported {
        match positions.get(index) {
            Some(&position) => failed.push(position),
            None => unknown.push(index),
        }
    }
    failed.sort_unstable();
    failed.dedup();

    let error = match (error, unknown.is_empty()) {
        (Some(err), _) => Some(err),
        (None, true) => None,
        (None, false) => Some(ConsumerError::handler(format!(
            "writer reported unknown record indices {unknown:?} for {} records",
            records.len()
        ))),
    };

    BatchOutcome { failed, error }
}

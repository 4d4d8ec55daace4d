//! Redis Streams sinks for the retry and dead-letter paths.
//!
//! - **Retry**: XADD the payload back onto the source stream so the consumer
//!   group redelivers it as a new entry.
//! - **Dead letter**: XADD onto a separate DLQ stream with a `failed_at`
//!   timestamp.
//!
//! Every attribute becomes a stream field; the payload goes in the
//! `payload` field.

use std::sync::Arc;

use tracing::{instrument, warn};

use batchline_core::{Attributes, ConsumerError, ConsumerResult};

use crate::sink::{DeadLetterHandler, RetryTransport};

/// Default stream key for retried messages
const DEFAULT_STREAM_KEY: &str = "batchline:messages";

/// Default dead-letter stream key
const DEFAULT_DLQ_KEY: &str = "batchline:messages:dlq";

const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),
}

impl From<RedisStreamsError> for ConsumerError {
    fn from(err: RedisStreamsError) -> Self {
        ConsumerError::transport(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RedisStreamsSink {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
}

impl RedisStreamsSink {
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `stream_key` - stream retried messages are appended to (default: "batchline:messages")
    /// * `dlq_key` - dead-letter stream (default: "batchline:messages:dlq")
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        dlq_key: Option<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            dlq_key: dlq_key.unwrap_or_else(|| DEFAULT_DLQ_KEY.to_string()),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn dlq_key(&self) -> &str {
        &self.dlq_key
    }

    fn xadd(
        &self,
        key: &str,
        data: &[u8],
        attributes: &Attributes,
        extra: &[(&str, String)],
    ) -> Result<String, RedisStreamsError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("*"); // Auto-generate entry ID

        for (field, value) in attributes {
            if field == PAYLOAD_FIELD {
                continue;
            }
            cmd.arg(field).arg(value);
        }
        for (field, value) in extra {
            cmd.arg(*field).arg(value);
        }
        cmd.arg(PAYLOAD_FIELD).arg(data);

        cmd.query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD {key} failed: {e}")))
    }
}

impl RetryTransport for RedisStreamsSink {
    #[instrument(skip(self, data, attributes), fields(stream_key = %self.stream_key), err)]
    fn resubmit(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        self.xadd(&self.stream_key, data, attributes, &[])?;
        Ok(())
    }
}

impl DeadLetterHandler for RedisStreamsSink {
    fn dead_letter(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        let failed_at = chrono::Utc::now().to_rfc3339();
        let entry_id = self.xadd(&self.dlq_key, data, attributes, &[("failed_at", failed_at)])?;

        warn!(
            dlq_key = %self.dlq_key,
            entry_id = %entry_id,
            "Message sent to dead-letter stream"
        );

        Ok(())
    }
}

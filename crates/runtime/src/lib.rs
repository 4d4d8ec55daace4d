//! Batching consumer runtime: buffer incoming messages, flush on size or
//! age, and route items the batch handler reports as failed to a retry
//! transport or, once their retry budget is spent, to a dead-letter sink.

pub mod adapters;
pub mod attempts;
pub mod buffer;
pub mod executor;
pub mod handler;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod trigger;
pub mod worker;


pub use adapters::{BatchWriter, DecodedBatchHandler, JsonObject, MapBatchHandler, RawBatchHandler};
pub use attempts::{AttemptTracker, Disposition};
pub use buffer::BatchBuffer;
pub use executor::{BatchExecutor, FlushReport, ItemFate};
pub use handler::{BatchHandler, BatchOutcome, Decoder, JsonDecoder, RejectHandler, Validator};
pub use retry::{BackoffStrategy, RetryError, RetryPolicy, Retrying, retry, retry_with};
pub use scheduler::{BatchScheduler, BatchSchedulerBuilder};
pub use stats::BatchStats;
pub use trigger::{FlushReason, FlushTrigger};
pub use worker::{ConsumerWorker, WorkerHandle};

//! The public entry point: owns the buffer, decides when to flush and runs
//! the executor.
//!
//! Every path that touches the buffer (`handle`, `on_timer`, `flush`) holds
//! one mutex for its whole critical section, flush included. At most one
//! flush is in flight per scheduler and a flush drains a buffer nobody else
//! can append to meanwhile; the price is that ingestion waits while the
//! batch handler runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use batchline_core::{Attributes, BatchConfig, ConfigError, ConsumerError, ConsumerResult, Message};
use batchline_observability::{Logger, TracingLogger};
use batchline_transport::{DeadLetterHandler, Delivery, LogDeadLetter, RetryTransport};

use crate::attempts::AttemptTracker;
use crate::buffer::BatchBuffer;
use crate::executor::{BatchExecutor, FailureRouter, FlushReport};
use crate::handler::{BatchHandler, Decoder, RejectHandler, Validator};
use crate::stats::{BatchStats, SharedStats};
use crate::trigger::{FlushReason, FlushTrigger};
use crate::worker::{WorkerHandle, timer_loop};

const DEFAULT_NAME: &str = "batchline";

/// Batching consumer for items of type `T`.
///
/// Cheap to clone; clones share the same buffer, executor and counters.
pub struct BatchScheduler<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    name: String,
    config: BatchConfig,
    trigger: FlushTrigger,
    buffer: Mutex<BatchBuffer<T>>,
    executor: BatchExecutor<T>,
    decoder: Option<Arc<dyn Decoder<T>>>,
    validator: Option<Arc<dyn Validator<T>>>,
    reject: Option<Arc<dyn RejectHandler<T>>>,
    logger: Arc<dyn Logger>,
    stats: SharedStats,
}

impl<T> Clone for BatchScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for BatchScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<T> BatchScheduler<T>
where
    T: Send + 'static,
{
    pub fn builder(config: BatchConfig) -> BatchSchedulerBuilder<T> {
        BatchSchedulerBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Number of buffered messages waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.lock_buffer().len()
    }

    pub fn stats(&self) -> BatchStats {
        self.inner.stats.snapshot()
    }

    /// Admit one message: decode and validate it, buffer it, and flush if
    /// the batch is now due.
    ///
    /// Never fails; rejections and flush errors are logged and counted.
    pub fn handle(&self, mut message: Message<T>) {
        self.inner.stats.record(|s| s.received += 1);

        if let Err(err) = self.admit(&mut message) {
            self.reject(message, err);
            return;
        }

        let mut buffer = self.lock_buffer();
        buffer.push(message);
        if let Some(reason) = buffer.check(&self.inner.trigger, Instant::now()) {
            self.flush_locked(&mut buffer, reason);
        }
    }

    /// Transport delivery callback: raw payload plus broker headers.
    pub fn receive(&self, data: impl Into<Vec<u8>>, attributes: Attributes) {
        self.handle(Message::new(data).with_attributes(attributes));
    }

    pub fn deliver(&self, delivery: Delivery) {
        self.handle(delivery.into_message());
    }

    /// Periodic check so a slow trickle of messages still gets flushed.
    pub fn on_timer(&self) {
        let mut buffer = self.lock_buffer();
        if let Some(reason) = buffer.check(&self.inner.trigger, Instant::now()) {
            self.flush_locked(&mut buffer, reason);
        }
    }

    /// Flush whatever is buffered, ready or not. `None` if the buffer was
    /// empty.
    pub fn flush(&self) -> Option<FlushReport> {
        let mut buffer = self.lock_buffer();
        if buffer.is_empty() {
            return None;
        }
        Some(self.flush_locked(&mut buffer, FlushReason::Forced))
    }

    /// Start the background timer.
    ///
    /// The thread ticks every `timeout_ms`. Shutting the handle down stops
    /// it and, with `drain_on_stop`, flushes the remaining buffer first.
    pub fn start(&self) -> ConsumerResult<WorkerHandle> {
        let scheduler = self.clone();
        self.inner.logger.info(format_args!(
            "starting timer for {} (batch_size={}, timeout_ms={})",
            self.inner.name, self.inner.config.batch_size, self.inner.config.timeout_ms
        ));
        WorkerHandle::spawn(format!("{}-timer", self.inner.name), move |shutdown_rx| {
            timer_loop(scheduler, shutdown_rx)
        })
    }

    fn admit(&self, message: &mut Message<T>) -> ConsumerResult<()> {
        if message.value.is_none() {
            if let Some(decoder) = &self.inner.decoder {
                message.value = Some(decoder.decode(&message.data)?);
            }
        }
        if let Some(validator) = &self.inner.validator {
            validator.validate(message)?;
        }
        Ok(())
    }

    fn reject(&self, message: Message<T>, err: ConsumerError) {
        self.inner.stats.record(|s| s.rejected += 1);
        match &self.inner.reject {
            Some(handler) => handler.reject(message, &err),
            None => self.inner.logger.warn(format_args!(
                "message {} rejected before buffering: {err}",
                message.id.as_deref().unwrap_or("<no id>")
            )),
        }
    }

    fn flush_locked(&self, buffer: &mut BatchBuffer<T>, reason: FlushReason) -> FlushReport {
        let batch = buffer.take_batch();
        let report = if batch.is_empty() {
            FlushReport::default()
        } else {
            self.inner.logger.debug(format_args!(
                "flushing {} messages ({})",
                batch.len(),
                reason.as_str()
            ));
            self.inner.executor.execute(batch)
        };
        buffer.reset(Instant::now());
        report
    }

    fn lock_buffer(&self) -> MutexGuard<'_, BatchBuffer<T>> {
        // Handler panics are caught by the executor; a panic elsewhere under
        // the lock leaves a buffer that is still consistent.
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`BatchScheduler`].
///
/// A batch handler and a retry transport are required; failed items are
/// only logged when no dead-letter handler is given.
pub struct BatchSchedulerBuilder<T> {
    config: BatchConfig,
    name: String,
    handler: Option<Arc<dyn BatchHandler<T>>>,
    retry: Option<Arc<dyn RetryTransport>>,
    dead_letter: Option<Arc<dyn DeadLetterHandler>>,
    decoder: Option<Arc<dyn Decoder<T>>>,
    validator: Option<Arc<dyn Validator<T>>>,
    reject: Option<Arc<dyn RejectHandler<T>>>,
    logger: Option<Arc<dyn Logger>>,
}

impl<T> BatchSchedulerBuilder<T>
where
    T: Send + 'static,
{
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            name: DEFAULT_NAME.to_string(),
            handler: None,
            retry: None,
            dead_letter: None,
            decoder: None,
            validator: None,
            reject: None,
            logger: None,
        }
    }

    /// Used for thread names and as the log component.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn handler(self, handler: impl BatchHandler<T> + 'static) -> Self {
        self.handler_shared(Arc::new(handler))
    }

    pub fn handler_shared(mut self, handler: Arc<dyn BatchHandler<T>>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn retry_transport(self, transport: impl RetryTransport + 'static) -> Self {
        self.retry_transport_shared(Arc::new(transport))
    }

    pub fn retry_transport_shared(mut self, transport: Arc<dyn RetryTransport>) -> Self {
        self.retry = Some(transport);
        self
    }

    pub fn dead_letter(self, handler: impl DeadLetterHandler + 'static) -> Self {
        self.dead_letter_shared(Arc::new(handler))
    }

    pub fn dead_letter_shared(mut self, handler: Arc<dyn DeadLetterHandler>) -> Self {
        self.dead_letter = Some(handler);
        self
    }

    pub fn decoder(self, decoder: impl Decoder<T> + 'static) -> Self {
        self.decoder_shared(Arc::new(decoder))
    }

    pub fn decoder_shared(mut self, decoder: Arc<dyn Decoder<T>>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn validator(mut self, validator: impl Validator<T> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn reject_handler(mut self, handler: impl RejectHandler<T> + 'static) -> Self {
        self.reject = Some(Arc::new(handler));
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<BatchScheduler<T>, ConfigError> {
        self.config.validate()?;
        let handler = self
            .handler
            .ok_or(ConfigError::MissingCollaborator("batch handler"))?;
        let retry = self
            .retry
            .ok_or(ConfigError::MissingCollaborator("retry transport"))?;
        let dead_letter = self
            .dead_letter
            .unwrap_or_else(|| Arc::new(LogDeadLetter) as Arc<dyn DeadLetterHandler>);
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(TracingLogger::new(self.name.clone())) as Arc<dyn Logger>);

        let stats = SharedStats::default();
        let router = FailureRouter {
            retry,
            dead_letter,
            tracker: AttemptTracker::from_config(&self.config),
            logger: logger.clone(),
            stats: stats.clone(),
        };
        let executor = BatchExecutor::new(handler, router, self.config.run_in_background);

        Ok(BatchScheduler {
            inner: Arc::new(Inner {
                name: self.name,
                trigger: FlushTrigger::from_config(&self.config),
                buffer: Mutex::new(BatchBuffer::new(self.config.batch_size)),
                config: self.config,
                executor,
                decoder: self.decoder,
                validator: self.validator,
                reject: self.reject,
                logger,
                stats,
            }),
        })
    }
}

//! One flush: call the batch handler, then route every failed item.
//!
//! Routing per failed item:
//!
//! 1. read the retry counter from its attributes ([`AttemptTracker`]);
//! 2. increment it;
//! 3. over the limit → dead-letter sink with the original attributes;
//! 4. otherwise → write the counter back and resubmit through the retry
//!    transport.
//!
//! Resubmission and dead-letter failures are logged and counted, never
//! retried here: a resubmitted item comes back as a brand-new delivery.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use batchline_core::{ConsumerError, Message};
use batchline_observability::Logger;
use batchline_transport::{DeadLetterHandler, RetryTransport};

use crate::attempts::{AttemptTracker, Disposition};
use crate::handler::{BatchHandler, BatchOutcome};
use crate::stats::SharedStats;

/// What happened to one failed item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ItemFate {
    Retried { attempt: u32 },
    ResubmitFailed { attempt: u32 },
    DeadLettered { attempts: u32 },
    DeadLetterFailed { attempts: u32 },
}

/// Summary of one flush.
///
/// In background mode, failed items are only counted as `dispatched`; their
/// fate shows up in the scheduler stats once the background task finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub batch_size: usize,
    pub failed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub resubmit_failures: usize,
    pub dead_letter_failures: usize,
    pub dispatched: usize,
    pub handler_error: Option<ConsumerError>,
}

impl FlushReport {
    fn record(&mut self, fate: ItemFate) {
        match fate {
            ItemFate::Retried { .. } => self.retried += 1,
            ItemFate::ResubmitFailed { .. } => self.resubmit_failures += 1,
            ItemFate::DeadLettered { .. } => self.dead_lettered += 1,
            ItemFate::DeadLetterFailed { .. } => self.dead_letter_failures += 1,
        }
    }
}

/// Everything needed to route a failed item, cheap to clone into a task.
#[derive(Clone)]
pub(crate) struct FailureRouter {
    pub(crate) retry: Arc<dyn RetryTransport>,
    pub(crate) dead_letter: Arc<dyn DeadLetterHandler>,
    pub(crate) tracker: AttemptTracker,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) stats: SharedStats,
}

impl FailureRouter {
    pub(crate) fn route<T>(&self, mut message: Message<T>) -> ItemFate {
        let id = message.id.clone().unwrap_or_default();

        let fate = match self.tracker.record_failure(&mut message.attributes) {
            Disposition::DeadLetter { attempts } => {
                match self.dead_letter.dead_letter(&message.data, &message.attributes) {
                    Ok(()) => {
                        self.logger.warn(format_args!(
                            "message {id} dead-lettered after {attempts} attempts (limit {})",
                            self.tracker.limit()
                        ));
                        ItemFate::DeadLettered { attempts }
                    }
                    Err(err) => {
                        self.logger
                            .error(format_args!("failed to dead-letter message {id}: {err}"));
                        ItemFate::DeadLetterFailed { attempts }
                    }
                }
            }
            Disposition::Retry { attempt } => {
                match self.retry.resubmit(&message.data, &message.attributes) {
                    Ok(()) => {
                        self.logger
                            .debug(format_args!("message {id} resubmitted, attempt {attempt}"));
                        ItemFate::Retried { attempt }
                    }
                    Err(err) => {
                        self.logger.error(format_args!(
                            "failed to resubmit message {id} (attempt {attempt}): {err}"
                        ));
                        ItemFate::ResubmitFailed { attempt }
                    }
                }
            }
        };

        self.stats.record(|s| match fate {
            ItemFate::Retried { .. } => s.retried += 1,
            ItemFate::ResubmitFailed { .. } => s.resubmit_failures += 1,
            ItemFate::DeadLettered { .. } => s.dead_lettered += 1,
            ItemFate::DeadLetterFailed { .. } => s.dead_letter_failures += 1,
        });

        fate
    }
}

pub struct BatchExecutor<T> {
    handler: Arc<dyn BatchHandler<T>>,
    router: FailureRouter,
    run_in_background: bool,
}

impl<T> BatchExecutor<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        handler: Arc<dyn BatchHandler<T>>,
        router: FailureRouter,
        run_in_background: bool,
    ) -> Self {
        Self {
            handler,
            router,
            run_in_background,
        }
    }

    /// Run the handler over `batch` and route whatever it reports as failed.
    ///
    /// A panicking handler is treated as a batch-level failure.
    pub fn execute(&self, batch: Vec<Message<T>>) -> FlushReport {
        let logger = &self.router.logger;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(&batch)))
            .unwrap_or_else(|payload| {
                BatchOutcome::error(ConsumerError::handler(format!(
                    "handler panicked: {}",
                    panic_message(&*payload)
                )))
            });

        let mut report = FlushReport {
            batch_size: batch.len(),
            handler_error: outcome.error.clone(),
            ..Default::default()
        };

        self.router.stats.record(|s| {
            s.flushes += 1;
            s.items_flushed += batch.len() as u64;
            if outcome.error.is_some() {
                s.handler_errors += 1;
            }
        });

        if let Some(err) = &outcome.error {
            logger.error(format_args!(
                "batch of {} failed: {err} ({} items reported failed)",
                batch.len(),
                outcome.failed.len()
            ));
        }

        let failed = take_failed(batch, outcome.failed, logger.as_ref());
        report.failed = failed.len();

        if failed.is_empty() {
            return report;
        }

        if self.run_in_background {
            report.dispatched = failed.len();
            self.dispatch(failed);
        } else {
            for message in failed {
                report.record(self.router.route(message));
            }
        }

        report
    }

    /// Route a flush's failed items on one background thread.
    fn dispatch(&self, failed: Vec<Message<T>>) {
        let router = self.router.clone();
        let slot = Arc::new(Mutex::new(failed));
        let task_slot = slot.clone();

        let spawned = thread::Builder::new()
            .name("batchline-retry".to_string())
            .spawn(move || {
                let mut guard = task_slot.lock().unwrap_or_else(PoisonError::into_inner);
                let failed = mem::take(&mut *guard);
                drop(guard);
                for message in failed {
                    router.route(message);
                }
            });

        if let Err(err) = spawned {
            // The closure never ran, so the items are still in the slot.
            self.router.logger.warn(format_args!(
                "could not dispatch retry task ({err}); routing inline"
            ));
            let failed = mem::take(&mut *slot.lock().unwrap_or_else(PoisonError::into_inner));
            for message in failed {
                self.router.route(message);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Pull the failed items out of `batch` in batch order.
///
/// Duplicate indices are collapsed; out-of-range ones are logged and ignored.
fn take_failed<T>(
    batch: Vec<Message<T>>,
    mut indices: Vec<usize>,
    logger: &dyn Logger,
) -> Vec<Message<T>> {
    if indices.is_empty() {
        return Vec::new();
    }

    let len = batch.len();
    indices.sort_unstable();
    indices.dedup();
    if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
        logger.warn(format_args!(
            "handler reported failed index {bad} for a batch of {len}; ignoring out-of-range indices"
        ));
        indices.retain(|&i| i < len);
    }

    let mut slots: Vec<Option<Message<T>>> = batch.into_iter().map(Some).collect();
    indices
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use batchline_core::{Attributes, ConsumerResult};
    use batchline_observability::{LogLevel, MemoryLogger};

    type Sent = Arc<Mutex<Vec<(Vec<u8>, Attributes)>>>;

    fn recorder(
        sent: &Sent,
    ) -> impl Fn(&[u8], &Attributes) -> ConsumerResult<()> + Send + Sync + 'static {
        let sent = sent.clone();
        move |data: &[u8], attrs: &Attributes| {
            sent.lock().unwrap().push((data.to_vec(), attrs.clone()));
            Ok(())
        }
    }

    struct Fixture {
        retried: Sent,
        dead: Sent,
        logger: Arc<MemoryLogger>,
        stats: SharedStats,
    }

    fn executor<H>(handler: H, limit: u32, background: bool) -> (BatchExecutor<()>, Fixture)
    where
        H: BatchHandler<()> + 'static,
    {
        let fixture = Fixture {
            retried: Sent::default(),
            dead: Sent::default(),
            logger: Arc::new(MemoryLogger::new()),
            stats: SharedStats::default(),
        };
        let router = FailureRouter {
            retry: Arc::new(recorder(&fixture.retried)),
            dead_letter: Arc::new(recorder(&fixture.dead)),
            tracker: AttemptTracker::new("retryCount", limit),
            logger: fixture.logger.clone(),
            stats: fixture.stats.clone(),
        };
        (BatchExecutor::new(Arc::new(handler), router, background), fixture)
    }

    fn msg(payload: &str, count: Option<&str>) -> Message<()> {
        let m = Message::new(payload.as_bytes().to_vec()).with_id(payload);
        match count {
            Some(c) => m.with_attribute("retryCount", c),
            None => m,
        }
    }

    #[test]
    fn only_listed_items_are_routed() {
        let (exec, fx) = executor(|_: &[Message<()>]| BatchOutcome::failed([1]), 3, false);

        let report = exec.execute(vec![msg("a", None), msg("b", Some("1")), msg("c", None)]);

        assert_eq!(report.batch_size, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 1);
        let retried = fx.retried.lock().unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].0, b"b");
        assert_eq!(retried[0].1.get("retryCount").map(String::as_str), Some("2"));
        assert!(fx.dead.lock().unwrap().is_empty());
    }

    #[test]
    fn over_limit_goes_to_dead_letter_with_original_attributes() {
        let (exec, fx) = executor(|_: &[Message<()>]| BatchOutcome::failed([0]), 2, false);

        let report = exec.execute(vec![msg("x", Some("2"))]);

        assert_eq!(report.dead_lettered, 1);
        assert!(fx.retried.lock().unwrap().is_empty());
        let dead = fx.dead.lock().unwrap();
        assert_eq!(dead[0].1.get("retryCount").map(String::as_str), Some("2"));
        assert!(fx.logger.contains(LogLevel::Warn, "dead-lettered after 3 attempts"));
    }

    #[test]
    fn batch_error_without_failed_items_is_only_logged() {
        let (exec, fx) = executor(
            |_: &[Message<()>]| BatchOutcome::error(ConsumerError::handler("db unreachable")),
            3,
            false,
        );

        let report = exec.execute(vec![msg("a", None), msg("b", None)]);

        assert_eq!(report.failed, 0);
        assert_eq!(report.handler_error, Some(ConsumerError::handler("db unreachable")));
        assert!(fx.retried.lock().unwrap().is_empty());
        assert!(fx.dead.lock().unwrap().is_empty());
        assert!(fx.logger.contains(LogLevel::Error, "db unreachable"));
        assert_eq!(fx.stats.snapshot().handler_errors, 1);
    }

    #[test]
    fn panicking_handler_becomes_a_batch_error() {
        let (exec, fx) = executor(
            |_: &[Message<()>]| -> BatchOutcome { panic!("disk on fire") },
            3,
            false,
        );

        let report = exec.execute(vec![msg("a", None)]);

        assert_eq!(report.batch_size, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            report.handler_error,
            Some(ConsumerError::handler("handler panicked: disk on fire"))
        );
        assert!(fx.retried.lock().unwrap().is_empty());
        assert!(fx.logger.contains(LogLevel::Error, "handler panicked"));
        assert_eq!(fx.stats.snapshot().handler_errors, 1);
    }

    #[test]
    fn duplicate_and_out_of_range_indices_are_ignored() {
        let (exec, fx) = executor(|_: &[Message<()>]| BatchOutcome::failed([0, 0, 7]), 3, false);

        let report = exec.execute(vec![msg("a", None), msg("b", None)]);

        assert_eq!(report.failed, 1);
        assert_eq!(fx.retried.lock().unwrap().len(), 1);
        assert!(fx.logger.contains(LogLevel::Warn, "index 7"));
    }

    #[test]
    fn resubmit_failure_is_logged_not_dead_lettered() {
        let dead = Sent::default();
        let logger = Arc::new(MemoryLogger::new());
        let stats = SharedStats::default();
        let router = FailureRouter {
            retry: Arc::new(|_: &[u8], _: &Attributes| -> ConsumerResult<()> {
                Err(ConsumerError::transport("broker gone"))
            }),
            dead_letter: Arc::new(recorder(&dead)),
            tracker: AttemptTracker::new("retryCount", 5),
            logger: logger.clone(),
            stats: stats.clone(),
        };
        let exec: BatchExecutor<()> = BatchExecutor::new(
            Arc::new(|_: &[Message<()>]| BatchOutcome::failed([0])),
            router,
            false,
        );

        let report = exec.execute(vec![msg("a", None)]);

        assert_eq!(report.resubmit_failures, 1);
        assert!(dead.lock().unwrap().is_empty());
        assert!(logger.contains(LogLevel::Error, "broker gone"));
        assert_eq!(stats.snapshot().resubmit_failures, 1);
    }

    #[test]
    fn background_mode_routes_failed_items_on_one_task() {
        let (done_tx, done_rx) = mpsc::channel::<(Option<String>, Vec<u8>)>();
        let done_tx = Mutex::new(done_tx);
        let router = FailureRouter {
            retry: Arc::new(move |data: &[u8], _: &Attributes| -> ConsumerResult<()> {
                let worker = thread::current().name().map(str::to_string);
                let _ = done_tx.lock().unwrap().send((worker, data.to_vec()));
                Ok(())
            }),
            dead_letter: Arc::new(|_: &[u8], _: &Attributes| -> ConsumerResult<()> { Ok(()) }),
            tracker: AttemptTracker::new("retryCount", 3),
            logger: Arc::new(MemoryLogger::new()),
            stats: SharedStats::default(),
        };
        let exec: BatchExecutor<()> = BatchExecutor::new(
            Arc::new(|batch: &[Message<()>]| BatchOutcome::failed(0..batch.len())),
            router,
            true,
        );

        let report = exec.execute(vec![msg("a", None), msg("b", None), msg("c", None)]);
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.retried, 0);

        let seen: Vec<_> = (0..3)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        let payloads: Vec<Vec<u8>> = seen.iter().map(|(_, data)| data.clone()).collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(
            seen.iter()
                .all(|(worker, _)| worker.as_deref() == Some("batchline-retry"))
        );
    }
}

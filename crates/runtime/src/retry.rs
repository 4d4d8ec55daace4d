//! Bounded retry over a caller-supplied delay schedule.
//!
//! [`retry`] runs an operation once and then once more after each delay in
//! the schedule. There is no jitter and no cap other than the schedule
//! length; [`RetryPolicy`] is a convenience for building common schedules.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use batchline_core::{Attributes, ConsumerError, ConsumerResult};
use batchline_observability::{Logger, NoopLogger};
use batchline_transport::{DeadLetterHandler, RetryTransport};

/// Every attempt failed; carries the last error.
#[derive(Debug, thiserror::Error)]
#[error("operation failed after {attempts} attempts: {last}")]
pub struct RetryError<E> {
    pub attempts: usize,
    pub last: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last
    }
}

/// Run `operation`, retrying after each of `delays` until it succeeds.
///
/// At most `delays.len() + 1` attempts are made.
pub fn retry<T, E, F>(delays: &[Duration], operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
{
    retry_with(delays, operation, |_, _, _| {})
}

/// Like [`retry`], calling `on_failure(attempt, &error, next_delay)` before
/// each sleep.
pub fn retry_with<T, E, F, N>(
    delays: &[Duration],
    mut operation: F,
    mut on_failure: N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    N: FnMut(usize, &E, Duration),
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => match delays.get(attempts - 1) {
                Some(&delay) => {
                    on_failure(attempts, &err, delay);
                    thread::sleep(delay);
                }
                None => {
                    return Err(RetryError {
                        attempts,
                        last: err,
                    });
                }
            },
        }
    }
}

/// Backoff strategy for building delay schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    #[default]
    Fixed,
    /// Linear backoff: base * attempt
    Linear,
    /// Exponential backoff: base * 2^(attempt - 1)
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap applied to every computed delay
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }

    /// The full delay schedule for [`retry`].
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts)
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }

    pub fn run<T, E, F>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        retry(&self.schedule(), operation)
    }
}

/// Retries the publish call of a sink over a fixed schedule.
///
/// This is connection-level resilience for the sink itself. The per-message
/// retry cycle (resubmit with an incremented counter) is unaffected.
pub struct Retrying<S> {
    inner: S,
    delays: Vec<Duration>,
    logger: Arc<dyn Logger>,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: &RetryPolicy) -> Self {
        Self::with_schedule(inner, policy.schedule())
    }

    pub fn with_schedule(inner: S, delays: Vec<Duration>) -> Self {
        Self {
            inner,
            delays,
            logger: Arc::new(NoopLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn attempt<F>(&self, what: &str, call: F) -> ConsumerResult<()>
    where
        F: FnMut() -> ConsumerResult<()>,
    {
        retry_with(&self.delays, call, |attempt, err: &ConsumerError, delay| {
            self.logger.warn(format_args!(
                "{what} attempt {attempt} failed: {err}; retrying in {delay:?}"
            ));
        })
        .map_err(|e| ConsumerError::transport(e.to_string()))
    }
}

impl<S: RetryTransport> RetryTransport for Retrying<S> {
    fn resubmit(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        self.attempt("resubmit", || self.inner.resubmit(data, attributes))
    }
}

impl<S: DeadLetterHandler> DeadLetterHandler for Retrying<S> {
    fn dead_letter(&self, data: &[u8], attributes: &Attributes) -> ConsumerResult<()> {
        self.attempt("dead-letter", || self.inner.dead_letter(data, attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use batchline_observability::{LogLevel, MemoryLogger};

    const TINY: Duration = Duration::from_millis(1);

    #[test]
    fn succeeds_without_retrying() {
        let mut calls = 0;
        let result: Result<u32, RetryError<&str>> = retry(&[TINY, TINY], || {
            calls += 1;
            Ok(7)
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result = retry(&[TINY, TINY, TINY], || {
            calls += 1;
            if calls < 3 { Err("not yet") } else { Ok(calls) }
        });

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn exhausted_schedule_reports_attempts_and_last_error() {
        let mut calls = 0;
        let err = retry(&[TINY, TINY], || -> Result<(), String> {
            calls += 1;
            Err(format!("failure {calls}"))
        })
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "failure 3");
        assert_eq!(err.to_string(), "operation failed after 3 attempts: failure 3");
    }

    #[test]
    fn empty_schedule_means_single_attempt() {
        let err = retry(&[], || -> Result<(), &str> { Err("nope") }).unwrap_err();
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn on_failure_sees_each_delay() {
        let delays = [Duration::from_millis(1), Duration::from_millis(2)];
        let mut seen = Vec::new();
        let _ = retry_with(
            &delays,
            || -> Result<(), ()> { Err(()) },
            |attempt, _, delay| seen.push((attempt, delay)),
        );

        assert_eq!(seen, vec![(1, delays[0]), (2, delays[1])]);
    }

    #[test]
    fn exponential_schedule_is_capped() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn linear_and_fixed_schedules() {
        let linear = RetryPolicy::linear(3, Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(
            linear.schedule(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );

        let fixed = RetryPolicy::fixed(2, Duration::from_millis(50));
        assert_eq!(fixed.schedule(), vec![Duration::from_millis(50); 2]);
        assert!(RetryPolicy::no_retry().schedule().is_empty());
    }

    #[test]
    fn retrying_sink_recovers_from_transient_failures() {
        let calls = AtomicUsize::new(0);
        let flaky = |_: &[u8], _: &Attributes| -> ConsumerResult<()> {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ConsumerError::transport("connection reset"))
            } else {
                Ok(())
            }
        };
        let logger = Arc::new(MemoryLogger::new());
        let sink = Retrying::with_schedule(flaky, vec![TINY; 3]).with_logger(logger.clone());

        assert!(sink.resubmit(b"x", &Attributes::new()).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(logger.at(LogLevel::Warn).len(), 2);
    }

    #[test]
    fn retrying_sink_gives_up_after_schedule() {
        let always_down =
            |_: &[u8], _: &Attributes| -> ConsumerResult<()> { Err(ConsumerError::transport("down")) };
        let sink = Retrying::with_schedule(always_down, vec![TINY]);

        let err = DeadLetterHandler::dead_letter(&sink, b"x", &Attributes::new()).unwrap_err();
        assert!(matches!(err, ConsumerError::Transport(msg) if msg.contains("after 2 attempts")));
    }
}

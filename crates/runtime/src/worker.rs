use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use batchline_core::{ConsumerError, ConsumerResult};
use batchline_transport::{Delivery, MessageBus, Subscription};

use crate::scheduler::BatchScheduler;

/// How long the consumer loop waits on the subscription before checking for
/// shutdown again.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to control and join a background thread.
///
/// Dropping the handle also stops the thread.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `body` on a named thread. The receiver fires (or disconnects)
    /// when the handle asks the thread to stop.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> ConsumerResult<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(shutdown_rx))
            .map_err(|e| ConsumerError::Spawn(format!("{name}: {e}")))?;

        Ok(Self {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request graceful shutdown and wait for the thread to stop.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                tracing::error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Periodic timeout check for a scheduler.
///
/// Wakes once per timeout, flushes if the batch is due, and on shutdown
/// drains whatever is still buffered when `drain_on_stop` is set.
pub(crate) fn timer_loop<T>(scheduler: BatchScheduler<T>, shutdown_rx: Receiver<()>)
where
    T: Send + 'static,
{
    let tick = scheduler.config().timeout();

    loop {
        match shutdown_rx.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => scheduler.on_timer(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if scheduler.config().drain_on_stop {
        scheduler.flush();
    }
}

/// Pumps deliveries from a bus subscription into a scheduler.
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Subscribe to `bus` and feed every delivery to `scheduler` on a
    /// dedicated thread.
    ///
    /// The subscription is taken before the thread starts, so nothing
    /// published after this call returns is missed.
    pub fn spawn<T, B>(
        name: impl Into<String>,
        bus: &B,
        scheduler: BatchScheduler<T>,
    ) -> ConsumerResult<WorkerHandle>
    where
        T: Send + 'static,
        B: MessageBus<Delivery> + ?Sized,
    {
        let sub = bus.subscribe();
        WorkerHandle::spawn(name, move |shutdown_rx| {
            consume_loop(sub, shutdown_rx, scheduler)
        })
    }
}

fn consume_loop<T>(
    sub: Subscription<Delivery>,
    shutdown_rx: Receiver<()>,
    scheduler: BatchScheduler<T>,
) where
    T: Send + 'static,
{
    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match sub.recv_timeout(POLL_INTERVAL) {
            Ok(delivery) => scheduler.deliver(delivery),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!(consumer = scheduler.name(), "subscription closed");
                break;
            }
        }
    }
}

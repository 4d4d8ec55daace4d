//! Message publishing/subscription abstraction (mechanics only).
//!
//! A [`MessageBus`] is how deliveries reach a consumer process in this
//! workspace: broker adapters publish onto it, and a consumer worker reads
//! from a [`Subscription`] and feeds each delivery into a scheduler.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a delivery may be seen more than once; batch handlers
//!   must be idempotent.
//! - **No cross-publisher ordering**: deliveries from one publisher arrive in
//!   publish order, nothing more.
//! - **No persistence**: the bus distributes, the broker stores.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to a message stream.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics).
///
/// ```ignore
/// let sub = bus.subscribe();
/// loop {
///     match sub.recv_timeout(Duration::from_millis(250)) {
///         Ok(delivery) => scheduler.receive(delivery),
///         Err(RecvTimeoutError::Timeout) => continue,  // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // bus dropped
///     }
/// }
/// ```
///
/// Subscriptions are meant for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic pub/sub.
///
/// `publish` may fail (bus closed, network error); the caller decides what a
/// failure means. On the retry path a failed publish is logged and the item
/// is lost to further retries.
pub trait MessageBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> MessageBus<M> for Arc<B>
where
    B: MessageBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}

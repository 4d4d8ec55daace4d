//! Broker-facing surface of a batching consumer.
//!
//! Broker clients themselves live elsewhere; this crate defines the narrow
//! shapes the runtime talks to (a raw [`Delivery`], a [`MessageBus`] to read
//! deliveries from, and the [`RetryTransport`] / [`DeadLetterHandler`] sinks
//! failed items are routed to) plus in-memory implementations for tests and
//! local pipelines.

pub mod bus;
pub mod dead_letter;
pub mod delivery;
pub mod in_memory_bus;
pub mod sink;

#[cfg(feature = "redis")]
pub mod redis_streams;

pub use bus::{MessageBus, Subscription};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use delivery::Delivery;
pub use in_memory_bus::{BusError, InMemoryBus};
pub use sink::{DeadLetterHandler, LogDeadLetter, Republish, RetryTransport};

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsSink};

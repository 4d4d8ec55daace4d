//! `batchline-core` — data model shared by every batchline crate.
//!
//! This crate contains **pure data** (no threads, no IO): the message that
//! flows through a consumer, the batching configuration, and the error types
//! collaborators report.

pub mod config;
pub mod error;
pub mod message;

pub use config::{BatchConfig, DEFAULT_RETRY_COUNT_NAME};
pub use error::{ConfigError, ConsumerError, ConsumerResult};
pub use message::{Attributes, Message};

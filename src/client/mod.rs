//! The `client` module is the client layer over the broker.
//!
//! It provides the [`Producer`], which connects to the broker and sends
//! messages through a FIFO queue with retries on transient failures, and the
//! [`PushConsumer`], which subscribes a consumer group to topics and pushes
//! batches to a registered [`BatchListener`].

pub mod consumer;
pub mod producer;

pub use consumer::{BatchListener, PushConsumer};
pub use producer::{PartitionSelector, Producer, SendCallback};

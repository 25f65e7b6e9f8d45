//! # ordermq
//!
//! `ordermq` implements ordered message production and batch-retry
//! consumption on top of a partitioned message broker. Producers route every
//! message sharing a correlation key to one partition, so consumers observe
//! those messages in send order. Consumers handle batches message by message
//! and, when one fails, tell the broker where redelivery has to resume so the
//! successfully handled prefix is not delivered again.
//!
//! ## Core Modules
//!
//! - `broker`: The in-process broker: topics, partitions, consumer groups, offsets, the reconsume schedule and dead-letter queues.
//! - `client`: The producer and push consumer clients used to talk to the broker.
//! - `dispatch`: The ordered dispatcher and partition selection by correlation key.
//! - `consume`: Batch processing with partial-failure tracking.
//! - `config`: Handles loading and validating the configuration.
//! - `demo`: Demo order events and a handler that logs them.
//! - `utils`: Shared utilities: error types, logging and retry backoff.

pub mod broker;
pub mod client;
pub mod config;
pub mod consume;
pub mod demo;
pub mod dispatch;
pub mod utils;

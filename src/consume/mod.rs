//! Batch consumption with partial-failure tracking.
//!
//! [`process_batch`] walks a batch strictly in delivery order and stops at the
//! first handler failure. The resulting [`ConsumeOutcome`] tells the broker
//! which prefix is done and where redelivery has to resume, so successful
//! messages before the failure are not handed out again.

pub mod batch;
pub mod outcome;

pub use batch::{BatchConsumer, MessageHandler, process_batch};
pub use outcome::{ConsumeOutcome, ConsumeStatus};

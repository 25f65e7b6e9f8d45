//! The in-process broker.
//!
//! This is the collaborator the ordered dispatcher and the batch consumer talk
//! to: it owns topics split into partitions, consumer groups with their
//! committed offsets, the reconsume schedule for explicitly failed messages and
//! the dead-letter queues. Clients reach it through [`crate::client`].

pub mod allocate;
pub mod engine;
pub mod filter;
pub mod message;
pub mod topic;

pub use engine::{BatchAck, BatchReceipt, Broker, PulledBatch, dead_letter_topic};
pub use message::{Message, MessageExt, SendResult};
pub use topic::PartitionId;

//! Ordered dispatch.
//!
//! [`OrderedDispatcher`] accepts a correlation key plus payload and sends the
//! message to the partition [`select_partition`] computes for the key, so all
//! messages sharing a key are consumed in send order. The partition list is
//! fetched fresh on every send; when a topic's partition count changes, order
//! across that change is not guaranteed.

pub mod dispatcher;
pub mod selector;

pub use dispatcher::{OrderedDispatcher, Readiness, log_outcome};
pub use selector::{
    CorrelationKey, CorrelationKeySelector, RoundRobinSelector, index_for_hash, select_partition,
};

#[cfg(test)]
mod tests;

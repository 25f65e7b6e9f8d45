//! Partition selection.
//!
//! A correlation key is hashed with xxh3 over its canonical text, so the same
//! key picks the same partition in every process and on every run. The index
//! is `|hash| mod n` computed on the unsigned magnitude, which keeps it in
//! range for negative hashes including `i64::MIN`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use xxhash_rust::xxh3::xxh3_64;

use crate::broker::{Message, PartitionId};
use crate::client::PartitionSelector;

/// The value that decides which partition a message is routed to.
///
/// Integer and string keys with the same text route identically: `Int(42)`
/// and `Str("42")` share a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Int(value) => write!(f, "{value}"),
            CorrelationKey::Str(value) => f.write_str(value),
        }
    }
}

impl From<i64> for CorrelationKey {
    fn from(value: i64) -> Self {
        CorrelationKey::Int(value)
    }
}

impl From<i32> for CorrelationKey {
    fn from(value: i32) -> Self {
        CorrelationKey::Int(value.into())
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        CorrelationKey::Str(value)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        CorrelationKey::Str(value.to_string())
    }
}

impl CorrelationKey {
    /// Stable signed 64-bit hash of the key's canonical text.
    pub fn stable_hash(&self) -> i64 {
        xxh3_64(self.to_string().as_bytes()) as i64
    }
}

/// Maps a signed hash onto `0..partition_count`.
pub fn index_for_hash(hash: i64, partition_count: usize) -> Option<usize> {
    if partition_count == 0 {
        return None;
    }
    Some((hash.unsigned_abs() % partition_count as u64) as usize)
}

/// Partition index of `key` among `partition_count` partitions, `None` when
/// there are no partitions.
pub fn select_partition(key: &CorrelationKey, partition_count: usize) -> Option<usize> {
    index_for_hash(key.stable_hash(), partition_count)
}

/// Routes every message carrying the same correlation key to the same partition.
#[derive(Debug, Clone)]
pub struct CorrelationKeySelector {
    key: CorrelationKey,
}

impl CorrelationKeySelector {
    pub fn new(key: CorrelationKey) -> Self {
        Self { key }
    }
}

impl PartitionSelector for CorrelationKeySelector {
    fn select(&self, partitions: &[PartitionId], _message: &Message) -> Option<PartitionId> {
        select_partition(&self.key, partitions.len()).map(|index| partitions[index].clone())
    }
}

/// Spreads messages over the partitions in turn. Used for unkeyed sends.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn starting_at(start: usize) -> Self {
        Self {
            next: AtomicUsize::new(start),
        }
    }
}

impl PartitionSelector for RoundRobinSelector {
    fn select(&self, partitions: &[PartitionId], _message: &Message) -> Option<PartitionId> {
        if partitions.is_empty() {
            return None;
        }
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        Some(partitions[turn % partitions.len()].clone())
    }
}

//! Partition allocation within a consumer group.
//!
//! Partitions are split into contiguous, near-equal ranges; the first
//! `partitions % members` members get one extra partition. Both inputs must
//! be sorted the same way on every member so all members agree.

use crate::broker::topic::PartitionId;

pub fn allocate_averagely(
    partitions: &[PartitionId],
    members: &[String],
    current: &str,
) -> Vec<PartitionId> {
    let Some(index) = members.iter().position(|m| m == current) else {
        return Vec::new();
    };
    if partitions.is_empty() {
        return Vec::new();
    }

    let total = partitions.len();
    let member_count = members.len();
    let remainder = total % member_count;
    let average = if total <= member_count {
        1
    } else if remainder > 0 && index < remainder {
        total / member_count + 1
    } else {
        total / member_count
    };
    let start = if remainder > 0 && index < remainder {
        index * average
    } else {
        index * average + remainder
    };
    let range = average.min(total.saturating_sub(start));

    (0..range)
        .map(|i| partitions[(start + i) % total].clone())
        .collect()
}

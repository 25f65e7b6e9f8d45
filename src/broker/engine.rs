//! Broker engine
//!
//! This module contains the in-process broker responsible for:
//! - managing topics and their partitions, creating topics on first use
//! - accepting appends from producers and waking consumers on arrival
//! - tracking consumer groups, their members and committed offsets
//! - handing out batches per partition to one worker at a time
//! - applying the outcome reported for a batch: commit, reconsume later with
//!   a delay, dead-letter after too many failures, or redeliver a lost batch
//!
//! Concurrency and usage notes:
//! - The public API is synchronous and guarded by a single internal lock, so
//!   the broker is shared as `Arc<Broker>` without any client-side locking.
//!   The lock is never held across an await point.
//! - An explicitly failed message suspends its partition for the reconsume
//!   delay and is redelivered ahead of its successors, so per-partition order
//!   survives retries. A batch that is never acknowledged is redelivered
//!   without a delay and without touching the reconsume count.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::broker::allocate::allocate_averagely;
use crate::broker::filter::{Subscription, TagFilter};
use crate::broker::message::{Message, MessageExt, SendResult};
use crate::broker::topic::{PartitionId, Topic};
use crate::config::{BrokerSettings, ConsumeFromWhere, split_addresses};
use crate::utils::error::BrokerError;

/// Prefix of the per-group dead-letter topic.
pub const DLQ_TOPIC_PREFIX: &str = "%DLQ%";

pub fn dead_letter_topic(group: &str) -> String {
    format!("{DLQ_TOPIC_PREFIX}{group}")
}

/// Messages handed to one consumer invocation, in partition order.
#[derive(Debug, Clone)]
pub struct PulledBatch {
    pub partition: PartitionId,
    pub messages: Vec<MessageExt>,
    /// Offset to commit when the whole batch is consumed.
    pub next_offset: u64,
}

impl PulledBatch {
    pub fn receipt(&self) -> BatchReceipt {
        BatchReceipt {
            partition: self.partition.clone(),
            offsets: self.messages.iter().map(|m| m.queue_offset).collect(),
            next_offset: self.next_offset,
        }
    }
}

/// What the broker needs to settle a batch once its messages are gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub partition: PartitionId,
    pub offsets: Vec<u64>,
    pub next_offset: u64,
}

/// Consumer verdict on a batch, as understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAck {
    /// Every message was consumed.
    Consumed,
    /// Messages before the index were consumed. The message at the index
    /// failed; it and everything after it are redelivered.
    RedeliverFrom(usize),
    /// The consumer never answered (it crashed). Nothing is committed.
    Lost,
}

#[derive(Debug)]
struct ConsumerGroup {
    consume_from_where: ConsumeFromWhere,
    subscriptions: HashMap<String, TagFilter>,
    members: BTreeSet<String>,
    offsets: HashMap<PartitionId, u64>,
    reconsume_counts: HashMap<(PartitionId, u64), u32>,
    locked: HashSet<PartitionId>,
    suspended_until: HashMap<PartitionId, Instant>,
}

impl ConsumerGroup {
    fn new(consume_from_where: ConsumeFromWhere) -> Self {
        Self {
            consume_from_where,
            subscriptions: HashMap::new(),
            members: BTreeSet::new(),
            offsets: HashMap::new(),
            reconsume_counts: HashMap::new(),
            locked: HashSet::new(),
            suspended_until: HashMap::new(),
        }
    }

    fn commit(&mut self, partition: &PartitionId, offset: u64, consumed: &[u64]) {
        for consumed_offset in consumed {
            self.reconsume_counts
                .remove(&(partition.clone(), *consumed_offset));
        }
        self.offsets.insert(partition.clone(), offset);
    }

    /// Fixes where the group starts on partitions of `topic` it has no
    /// offset for yet, so nothing appended after joining is skipped.
    fn pin_start_offsets(&mut self, topic: &Topic) {
        for partition in topic.readable_partitions() {
            let start = match self.consume_from_where {
                ConsumeFromWhere::FirstOffset => 0,
                ConsumeFromWhere::LastOffset => topic
                    .partition(partition.queue_id)
                    .map_or(0, |p| p.max_offset()),
            };
            self.offsets.entry(partition).or_insert(start);
        }
    }

    fn is_suspended(&mut self, partition: &PartitionId) -> bool {
        match self.suspended_until.get(partition) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                self.suspended_until.remove(partition);
                false
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Topic>,
    groups: HashMap<String, ConsumerGroup>,
}

impl BrokerState {
    fn topic_or_create(&mut self, name: &str, partition_count: usize) -> &mut Topic {
        self.topics.entry(name.to_string()).or_insert_with(|| {
            info!(topic = name, partition_count, "topic created");
            Topic::new(name, partition_count)
        })
    }
}

#[derive(Debug)]
pub struct Broker {
    settings: BrokerSettings,
    addresses: Vec<String>,
    available: AtomicBool,
    state: Mutex<BrokerState>,
    arrivals: Notify,
}

impl Broker {
    /// Creates a broker listening on the addresses of `settings.namesrv_addr`.
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            addresses: settings.addresses(),
            settings,
            available: AtomicBool::new(true),
            state: Mutex::new(BrokerState::default()),
            arrivals: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable)
        }
    }

    /// Simulates an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
        info!(available, "broker availability changed");
        self.arrivals.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Establishes a client connection. Succeeds when any of the `;`
    /// separated addresses is one this broker listens on.
    pub fn connect(&self, namesrv_addr: &str) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let matched = split_addresses(namesrv_addr)
            .iter()
            .any(|addr| self.addresses.contains(addr));
        if matched {
            debug!(namesrv_addr, "client connected");
            Ok(())
        } else {
            Err(BrokerError::UnknownAddress(namesrv_addr.to_string()))
        }
    }

    /// Current writable partitions of `topic`, creating the topic if needed.
    pub fn partitions(&self, topic: &str) -> Result<Vec<PartitionId>, BrokerError> {
        self.ensure_available()?;
        if topic.trim().is_empty() {
            return Err(BrokerError::EmptyTopic);
        }
        let partition_count = self.settings.default_partition_count;
        Ok(self
            .state()
            .topic_or_create(topic, partition_count)
            .writable_partitions())
    }

    /// Changes how many partitions of `topic` accept writes.
    pub fn set_partition_count(&self, topic: &str, partition_count: usize) -> Result<(), BrokerError> {
        if topic.trim().is_empty() {
            return Err(BrokerError::EmptyTopic);
        }
        {
            let mut state = self.state();
            state
                .topic_or_create(topic, partition_count)
                .resize(partition_count);
            let BrokerState { topics, groups } = &mut *state;
            if let Some(resized) = topics.get(topic) {
                for entry in groups.values_mut() {
                    if entry.subscriptions.contains_key(topic) {
                        entry.pin_start_offsets(resized);
                    }
                }
            }
        }
        info!(topic, partition_count, "partition count changed");
        self.arrivals.notify_waiters();
        Ok(())
    }

    pub fn append(&self, partition: &PartitionId, message: Message) -> Result<SendResult, BrokerError> {
        self.ensure_available()?;
        let result = {
            let mut state = self.state();
            let target = state
                .topics
                .get_mut(&partition.topic)
                .and_then(|t| t.partition_mut(partition.queue_id))
                .filter(|p| p.is_writable())
                .ok_or_else(|| BrokerError::UnknownPartition(partition.clone()))?;
            target.append(message)
        };
        debug!(%result, "message stored");
        self.arrivals.notify_waiters();
        Ok(result)
    }

    /// Reads up to `max` stored messages starting at `from`, outside of any group.
    pub fn read(&self, partition: &PartitionId, from: u64, max: usize) -> Result<Vec<MessageExt>, BrokerError> {
        let state = self.state();
        let source = state
            .topics
            .get(&partition.topic)
            .and_then(|t| t.partition(partition.queue_id))
            .ok_or_else(|| BrokerError::UnknownPartition(partition.clone()))?;
        Ok((from..source.max_offset())
            .take(max)
            .filter_map(|offset| source.view(offset, 0))
            .collect())
    }

    /// Messages moved to the dead-letter topic of `group`.
    pub fn dead_letters(&self, group: &str) -> Vec<MessageExt> {
        let dlq = PartitionId::new(dead_letter_topic(group), 0);
        self.read(&dlq, 0, usize::MAX).unwrap_or_default()
    }

    pub fn register_consumer(
        &self,
        group: &str,
        consumer_id: &str,
        subscriptions: &[Subscription],
        consume_from_where: ConsumeFromWhere,
    ) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let partition_count = self.settings.default_partition_count;
        let mut state = self.state();
        for subscription in subscriptions {
            state.topic_or_create(&subscription.topic, partition_count);
        }
        let BrokerState { topics, groups } = &mut *state;
        let entry = groups
            .entry(group.to_string())
            .or_insert_with(|| ConsumerGroup::new(consume_from_where));
        for subscription in subscriptions {
            entry
                .subscriptions
                .insert(subscription.topic.clone(), subscription.filter.clone());
            if let Some(topic) = topics.get(&subscription.topic) {
                entry.pin_start_offsets(topic);
            }
        }
        entry.members.insert(consumer_id.to_string());
        info!(
            group,
            consumer_id,
            members = entry.members.len(),
            "consumer registered"
        );
        Ok(())
    }

    pub fn unregister_consumer(&self, group: &str, consumer_id: &str) {
        if let Some(entry) = self.state().groups.get_mut(group) {
            entry.members.remove(consumer_id);
            info!(
                group,
                consumer_id,
                members = entry.members.len(),
                "consumer unregistered"
            );
        }
    }

    /// Partitions `consumer_id` is responsible for under the current membership.
    pub fn assigned_partitions(&self, group: &str, consumer_id: &str) -> Result<Vec<PartitionId>, BrokerError> {
        let state = self.state();
        let entry = state
            .groups
            .get(group)
            .ok_or_else(|| BrokerError::UnknownGroup(group.to_string()))?;

        let mut topic_names: Vec<&String> = entry.subscriptions.keys().collect();
        topic_names.sort();
        let partitions: Vec<PartitionId> = topic_names
            .into_iter()
            .filter_map(|name| state.topics.get(name))
            .flat_map(Topic::readable_partitions)
            .collect();
        let members: Vec<String> = entry.members.iter().cloned().collect();

        Ok(allocate_averagely(&partitions, &members, consumer_id))
    }

    /// Hands out the next batch of `partition` for `group`.
    ///
    /// Returns `None` when the partition is being consumed by another worker,
    /// is waiting out a reconsume delay, or has nothing matching the group's
    /// tag filter. Non-matching messages are committed as they are skipped.
    pub fn pull(&self, group: &str, partition: &PartitionId, max_batch: usize) -> Result<Option<PulledBatch>, BrokerError> {
        self.ensure_available()?;
        let mut state = self.state();
        let BrokerState { topics, groups } = &mut *state;
        let entry = groups
            .get_mut(group)
            .ok_or_else(|| BrokerError::UnknownGroup(group.to_string()))?;

        if entry.locked.contains(partition) || entry.is_suspended(partition) {
            return Ok(None);
        }

        let source = topics
            .get(&partition.topic)
            .and_then(|t| t.partition(partition.queue_id))
            .ok_or_else(|| BrokerError::UnknownPartition(partition.clone()))?;
        let filter = entry
            .subscriptions
            .get(&partition.topic)
            .cloned()
            .unwrap_or(TagFilter::All);

        let consume_from_where = entry.consume_from_where;
        let start = *entry
            .offsets
            .entry(partition.clone())
            .or_insert_with(|| match consume_from_where {
                ConsumeFromWhere::FirstOffset => 0,
                ConsumeFromWhere::LastOffset => source.max_offset(),
            });

        let end = source.max_offset();
        let mut messages = Vec::new();
        let mut next_offset = start;
        while next_offset < end && messages.len() < max_batch {
            let matched = source
                .get(next_offset)
                .is_some_and(|stored| filter.matches(stored.message.tag.as_deref()));
            if matched {
                let reconsume_count = entry
                    .reconsume_counts
                    .get(&(partition.clone(), next_offset))
                    .copied()
                    .unwrap_or(0);
                messages.extend(source.view(next_offset, reconsume_count));
            }
            next_offset += 1;
        }

        if messages.is_empty() {
            if next_offset > start {
                debug!(%partition, skipped = next_offset - start, "skipped messages not matching filter");
                entry.offsets.insert(partition.clone(), next_offset);
            }
            return Ok(None);
        }

        entry.locked.insert(partition.clone());
        Ok(Some(PulledBatch {
            partition: partition.clone(),
            messages,
            next_offset,
        }))
    }

    /// Settles a batch previously returned by [`Broker::pull`].
    pub fn complete(&self, group: &str, receipt: &BatchReceipt, ack: BatchAck) -> Result<(), BrokerError> {
        {
            let mut state = self.state();
            let BrokerState { topics, groups } = &mut *state;
            let entry = groups
                .get_mut(group)
                .ok_or_else(|| BrokerError::UnknownGroup(group.to_string()))?;
            let partition = &receipt.partition;
            entry.locked.remove(partition);

            let failed = match ack {
                BatchAck::Lost => {
                    warn!(%partition, size = receipt.offsets.len(), "batch was never acknowledged, redelivering");
                    None
                }
                BatchAck::Consumed => {
                    entry.commit(partition, receipt.next_offset, &receipt.offsets);
                    None
                }
                BatchAck::RedeliverFrom(index) => match receipt.offsets.get(index) {
                    Some(&failed_offset) => {
                        entry.commit(partition, failed_offset, &receipt.offsets[..index]);
                        Some(failed_offset)
                    }
                    None => {
                        entry.commit(partition, receipt.next_offset, &receipt.offsets);
                        None
                    }
                },
            };

            if let Some(failed_offset) = failed {
                let key = (partition.clone(), failed_offset);
                let count = entry.reconsume_counts.get(&key).copied().unwrap_or(0) + 1;

                if count > self.settings.max_reconsume_times {
                    entry.reconsume_counts.remove(&key);
                    entry.offsets.insert(partition.clone(), failed_offset + 1);
                    let original = topics
                        .get(&partition.topic)
                        .and_then(|t| t.partition(partition.queue_id))
                        .and_then(|p| p.get(failed_offset))
                        .map(|stored| stored.message.clone());
                    if let Some(message) = original {
                        let dlq_name = dead_letter_topic(group);
                        let dlq = topics
                            .entry(dlq_name.clone())
                            .or_insert_with(|| Topic::new(&dlq_name, 1));
                        if let Some(dlq_partition) = dlq.partition_mut(0) {
                            let result = dlq_partition.append(message);
                            warn!(
                                %partition,
                                offset = failed_offset,
                                reconsume_count = count - 1,
                                dead_letter = %result,
                                "reconsume attempts exhausted, message moved to dead-letter queue"
                            );
                        }
                    }
                } else {
                    entry.reconsume_counts.insert(key, count);
                    let delay = self.reconsume_delay(count);
                    entry
                        .suspended_until
                        .insert(partition.clone(), Instant::now() + delay);
                    info!(
                        %partition,
                        offset = failed_offset,
                        reconsume_count = count,
                        delay_ms = delay.as_millis() as u64,
                        "message scheduled for reconsume"
                    );
                }
            }
        }

        self.arrivals.notify_waiters();
        Ok(())
    }

    /// Committed offset of `group` on `partition`, once the group has joined it.
    pub fn committed_offset(&self, group: &str, partition: &PartitionId) -> Option<u64> {
        self.state()
            .groups
            .get(group)
            .and_then(|entry| entry.offsets.get(partition).copied())
    }

    /// Delay before the `count`-th redelivery of an explicitly failed message.
    pub fn reconsume_delay(&self, count: u32) -> Duration {
        let delays = &self.settings.reconsume_delays_ms;
        match delays.len() {
            0 => Duration::ZERO,
            len => {
                let idx = (count as usize).saturating_sub(1).min(len - 1);
                Duration::from_millis(delays[idx])
            }
        }
    }

    /// Waits until something changes (append, settle, availability) or `timeout` passes.
    pub async fn wait_for_arrivals(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.arrivals.notified()).await;
    }
}

//! Topic management
//!
//! A `Topic` is split into partitions (queues). Each `Partition` is an
//! append-only log addressed by offset. Shrinking a topic only stops new
//! writes to the trailing partitions; already stored messages stay readable
//! so consumers can drain them.
//!
//! Concurrency note: callers must synchronize access (the broker keeps all
//! topics behind its state lock).

use std::fmt;

use chrono::Utc;
use uuid::Uuid;

use crate::broker::message::{Message, MessageExt, SendResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    pub topic: String,
    pub queue_id: u32,
}

impl PartitionId {
    pub fn new(topic: impl Into<String>, queue_id: u32) -> Self {
        Self {
            topic: topic.into(),
            queue_id,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic, self.queue_id)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub msg_id: String,
    pub born_timestamp: i64,
    pub message: Message,
}

#[derive(Debug)]
pub struct Partition {
    pub id: PartitionId,
    log: Vec<StoredMessage>,
    writable: bool,
}

impl Partition {
    fn new(id: PartitionId) -> Self {
        Self {
            id,
            log: Vec::new(),
            writable: true,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Offset the next appended message will get.
    pub fn max_offset(&self) -> u64 {
        self.log.len() as u64
    }

    pub(crate) fn append(&mut self, message: Message) -> SendResult {
        let stored = StoredMessage {
            msg_id: Uuid::new_v4().simple().to_string().to_uppercase(),
            born_timestamp: Utc::now().timestamp_millis(),
            message,
        };
        let result = SendResult {
            msg_id: stored.msg_id.clone(),
            partition: self.id.clone(),
            queue_offset: self.max_offset(),
        };
        self.log.push(stored);
        result
    }

    pub(crate) fn get(&self, offset: u64) -> Option<&StoredMessage> {
        usize::try_from(offset).ok().and_then(|idx| self.log.get(idx))
    }

    /// Builds the delivered view of the message at `offset`.
    pub(crate) fn view(&self, offset: u64, reconsume_count: u32) -> Option<MessageExt> {
        self.get(offset).map(|stored| MessageExt {
            msg_id: stored.msg_id.clone(),
            partition: self.id.clone(),
            queue_offset: offset,
            reconsume_count,
            born_timestamp: stored.born_timestamp,
            message: stored.message.clone(),
        })
    }
}

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    partitions: Vec<Partition>,
}

impl Topic {
    /// Create a new topic with `partition_count` writable partitions.
    pub fn new(name: &str, partition_count: usize) -> Self {
        let mut topic = Self {
            name: name.to_string(),
            partitions: Vec::new(),
        };
        topic.resize(partition_count);
        topic
    }

    /// Changes the number of writable partitions. Growing adds empty
    /// partitions or re-opens closed ones; shrinking closes the trailing ones.
    pub fn resize(&mut self, partition_count: usize) {
        while self.partitions.len() < partition_count {
            let queue_id = self.partitions.len() as u32;
            self.partitions
                .push(Partition::new(PartitionId::new(&self.name, queue_id)));
        }
        for (idx, partition) in self.partitions.iter_mut().enumerate() {
            partition.writable = idx < partition_count;
        }
    }

    /// Partitions producers may currently send to, in queue order.
    pub fn writable_partitions(&self) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|p| p.writable)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Every partition consumers must drain, including closed ones.
    pub fn readable_partitions(&self) -> Vec<PartitionId> {
        self.partitions.iter().map(|p| p.id.clone()).collect()
    }

    pub fn partition(&self, queue_id: u32) -> Option<&Partition> {
        self.partitions.get(queue_id as usize)
    }

    pub fn partition_mut(&mut self, queue_id: u32) -> Option<&mut Partition> {
        self.partitions.get_mut(queue_id as usize)
    }
}

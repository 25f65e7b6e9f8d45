//! Message definitions for the broker
//!
//! `Message` is what a producer hands over: routing metadata plus an opaque
//! body. `MessageExt` is what a consumer receives: the same message plus the
//! broker-maintained delivery metadata.
//!
//! Notes on fields:
//! - `tag`: used by consumers for subscription filtering
//! - `key`: application identifier for tracing and deduplication, never routing
//! - `reconsume_count`: incremented by the broker after every reported failure
//!   of this message; consumers treat it as read-only

use std::fmt;

use bytes::Bytes;

use crate::broker::topic::PartitionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub tag: Option<String>,
    pub key: Option<String>,
    pub body: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            tag: None,
            key: None,
            body: body.into(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A message as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageExt {
    pub msg_id: String,
    pub partition: PartitionId,
    pub queue_offset: u64,
    pub reconsume_count: u32,
    /// Milliseconds since the UNIX epoch at which the broker stored the message.
    pub born_timestamp: i64,
    pub message: Message,
}

impl MessageExt {
    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    pub fn tag(&self) -> Option<&str> {
        self.message.tag.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.message.key.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }
}

/// Broker acknowledgement of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub msg_id: String,
    pub partition: PartitionId,
    pub queue_offset: u64,
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "msg_id={} partition={} offset={}",
            self.msg_id, self.partition, self.queue_offset
        )
    }
}

use serde::{Deserialize, Serialize};

use crate::broker::filter::Subscription;
use crate::utils::error::SettingsError;

/// Top-level configuration settings for the application.
///
/// Groups the broker, producer and consumer configuration plus the log level.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub log_level: String,
    pub broker: BrokerSettings,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
}

/// Configuration settings for the broker connection and the in-process broker.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Name server address(es), separated by `;`.
    pub namesrv_addr: String,
    /// Partition count used when a topic is created on first use.
    pub default_partition_count: usize,
    /// Explicit failures tolerated per message before it is dead-lettered.
    pub max_reconsume_times: u32,
    /// Redelivery delay per reconsume attempt. The last entry repeats.
    pub reconsume_delays_ms: Vec<u64>,
}

/// Configuration settings for the producer.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProducerSettings {
    pub group: String,
    /// Extra attempts after the first failed send.
    pub retry_times_when_send_failed: u32,
    pub retry_backoff_ms: u64,
    /// Connection attempts made by the startup loop before giving up.
    pub startup_attempts: u32,
    pub startup_backoff_ms: u64,
}

/// Configuration settings for the push consumer.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub group: String,
    pub message_batch_max_size: usize,
    /// `topic~tagFilter` pairs, e.g. `order-topic~TagA || TagC`.
    pub topics_and_tags: Vec<String>,
    /// Upper bound on batches processed concurrently by one consumer.
    pub consume_thread_max: usize,
    pub consume_from_where: ConsumeFromWhere,
    pub pull_interval_ms: u64,
}

/// Where a consumer group starts reading a partition it has never consumed.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeFromWhere {
    /// Replay everything still held by the broker.
    #[default]
    FirstOffset,
    /// Skip history and only see messages appended after the group joined.
    LastOffset,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub log_level: Option<String>,
    pub broker: Option<PartialBrokerSettings>,
    pub producer: Option<PartialProducerSettings>,
    pub consumer: Option<PartialConsumerSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub namesrv_addr: Option<String>,
    pub default_partition_count: Option<usize>,
    pub max_reconsume_times: Option<u32>,
    pub reconsume_delays_ms: Option<Vec<u64>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialProducerSettings {
    pub group: Option<String>,
    pub retry_times_when_send_failed: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub startup_attempts: Option<u32>,
    pub startup_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialConsumerSettings {
    pub group: Option<String>,
    pub message_batch_max_size: Option<usize>,
    pub topics_and_tags: Option<Vec<String>>,
    pub consume_thread_max: Option<usize>,
    pub consume_from_where: Option<ConsumeFromWhere>,
    pub pull_interval_ms: Option<u64>,
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        Settings {
            log_level: self.log_level.unwrap_or(default.log_level),
            broker: self.broker.unwrap_or_default().merge(default.broker),
            producer: self.producer.unwrap_or_default().merge(default.producer),
            consumer: self.consumer.unwrap_or_default().merge(default.consumer),
        }
    }
}

impl PartialBrokerSettings {
    fn merge(self, default: BrokerSettings) -> BrokerSettings {
        BrokerSettings {
            namesrv_addr: self.namesrv_addr.unwrap_or(default.namesrv_addr),
            default_partition_count: self
                .default_partition_count
                .unwrap_or(default.default_partition_count),
            max_reconsume_times: self
                .max_reconsume_times
                .unwrap_or(default.max_reconsume_times),
            reconsume_delays_ms: self
                .reconsume_delays_ms
                .unwrap_or(default.reconsume_delays_ms),
        }
    }
}

impl PartialProducerSettings {
    fn merge(self, default: ProducerSettings) -> ProducerSettings {
        ProducerSettings {
            group: self.group.unwrap_or(default.group),
            retry_times_when_send_failed: self
                .retry_times_when_send_failed
                .unwrap_or(default.retry_times_when_send_failed),
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(default.retry_backoff_ms),
            startup_attempts: self.startup_attempts.unwrap_or(default.startup_attempts),
            startup_backoff_ms: self
                .startup_backoff_ms
                .unwrap_or(default.startup_backoff_ms),
        }
    }
}

impl PartialConsumerSettings {
    fn merge(self, default: ConsumerSettings) -> ConsumerSettings {
        ConsumerSettings {
            group: self.group.unwrap_or(default.group),
            message_batch_max_size: self
                .message_batch_max_size
                .unwrap_or(default.message_batch_max_size),
            topics_and_tags: self.topics_and_tags.unwrap_or(default.topics_and_tags),
            consume_thread_max: self
                .consume_thread_max
                .unwrap_or(default.consume_thread_max),
            consume_from_where: self
                .consume_from_where
                .unwrap_or(default.consume_from_where),
            pull_interval_ms: self.pull_interval_ms.unwrap_or(default.pull_interval_ms),
        }
    }
}

impl Settings {
    /// Rejects settings that would leave a component half started.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.broker.namesrv_addr.trim().is_empty() {
            return Err(SettingsError::Missing("broker.namesrv_addr"));
        }
        if self.broker.default_partition_count == 0 {
            return Err(SettingsError::NotPositive("broker.default_partition_count"));
        }
        if self.producer.group.trim().is_empty() {
            return Err(SettingsError::Missing("producer.group"));
        }
        if self.producer.startup_attempts == 0 {
            return Err(SettingsError::NotPositive("producer.startup_attempts"));
        }
        if self.consumer.group.trim().is_empty() {
            return Err(SettingsError::Missing("consumer.group"));
        }
        if self.consumer.message_batch_max_size == 0 {
            return Err(SettingsError::NotPositive("consumer.message_batch_max_size"));
        }
        if self.consumer.consume_thread_max == 0 {
            return Err(SettingsError::NotPositive("consumer.consume_thread_max"));
        }
        if self.consumer.topics_and_tags.is_empty() {
            return Err(SettingsError::Missing("consumer.topics_and_tags"));
        }
        self.consumer.subscriptions().map(|_| ())
    }
}

impl ConsumerSettings {
    /// Parses every `topic~tagFilter` entry.
    pub fn subscriptions(&self) -> Result<Vec<Subscription>, SettingsError> {
        self.topics_and_tags
            .iter()
            .map(|entry| Subscription::parse(entry))
            .collect()
    }
}

impl BrokerSettings {
    /// The individual addresses of `namesrv_addr`.
    pub fn addresses(&self) -> Vec<String> {
        split_addresses(&self.namesrv_addr)
    }
}

pub(crate) fn split_addresses(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            broker: BrokerSettings {
                namesrv_addr: "127.0.0.1:9876".to_string(),
                default_partition_count: 4,
                max_reconsume_times: 16,
                reconsume_delays_ms: [
                    10, 30, 60, 120, 180, 240, 300, 360, 420, 480, 540, 600, 1200, 1800, 3600,
                    7200,
                ]
                .iter()
                .map(|secs| secs * 1000)
                .collect(),
            },
            producer: ProducerSettings {
                group: "grampus-order".to_string(),
                retry_times_when_send_failed: 10,
                retry_backoff_ms: 100,
                startup_attempts: 5,
                startup_backoff_ms: 2000,
            },
            consumer: ConsumerSettings {
                group: "grampus-order-consumer".to_string(),
                message_batch_max_size: 10,
                topics_and_tags: vec!["order-topic~*".to_string()],
                consume_thread_max: 20,
                consume_from_where: ConsumeFromWhere::FirstOffset,
                pull_interval_ms: 50,
            },
        }
    }
}

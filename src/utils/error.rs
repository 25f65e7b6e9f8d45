//! The `error` module defines the error types used within `ordermq`.
//!
//! Each layer has its own enum: the broker reports [`BrokerError`], the client
//! layer wraps it in [`ClientError`], configuration problems surface as
//! [`SettingsError`], the ordered dispatcher reports [`DispatchError`] and
//! message handlers fail with [`HandlerError`].

use thiserror::Error;

use crate::broker::topic::PartitionId;

/// Errors raised by the broker collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker cannot be reached right now. Callers may retry.
    #[error("broker is unavailable")]
    Unavailable,
    #[error("no broker is listening on {0}")]
    UnknownAddress(String),
    #[error("topic name must not be empty")]
    EmptyTopic,
    #[error("partition {0} does not exist or is not writable")]
    UnknownPartition(PartitionId),
    #[error("consumer group {0} is not registered")]
    UnknownGroup(String),
}

impl BrokerError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable)
    }
}

/// Errors raised by the producer and push consumer clients.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("client is not started")]
    NotStarted,
    #[error("client has been shut down")]
    ShutDown,
    #[error("no batch listener registered")]
    NoListener,
    #[error("no subscription registered")]
    NoSubscription,
    #[error("no partition available for topic {0}")]
    NoPartition(String),
    #[error("send failed after {attempts} attempts: {source}")]
    SendFailed {
        attempts: u32,
        #[source]
        source: BrokerError,
    },
    #[error("invalid tag filter: {0}")]
    InvalidFilter(#[from] SettingsError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Broker(e) if e.is_transient())
    }
}

/// Configuration failures. Fatal at startup.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("{0} must not be empty")]
    Missing(&'static str),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("invalid subscription {0:?}, expected topic~tagFilter")]
    InvalidSubscription(String),
}

/// Errors reported synchronously by the ordered dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatcher is not ready to accept sends")]
    NotReady,
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("dispatcher failed to start: {0}")]
    Startup(#[source] ClientError),
    #[error("payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Application-level failure while handling a single message.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("message body is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
    #[error("message body could not be parsed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("message rejected: {0}")]
    Rejected(String),
}

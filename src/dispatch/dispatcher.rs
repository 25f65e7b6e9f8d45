use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::Message;
use crate::client::{Producer, SendCallback};
use crate::config::ProducerSettings;
use crate::dispatch::selector::{CorrelationKey, CorrelationKeySelector, RoundRobinSelector};
use crate::utils::error::DispatchError;
use crate::utils::retry::RetryPolicy;

/// Whether the dispatcher accepts sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Connecting to the broker.
    Starting,
    Ready,
    /// The startup loop gave up.
    Failed,
    Stopped,
}

/// Producer-side entry point that keeps messages sharing a correlation key
/// on one partition, hence in send order for consumers.
pub struct OrderedDispatcher {
    producer: Producer,
    startup_attempts: u32,
    startup_policy: RetryPolicy,
    readiness: watch::Sender<Readiness>,
    unkeyed_turn: AtomicUsize,
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn build_message(topic: &str, tag: Option<&str>, key: Option<&str>, body: Bytes) -> Message {
    let mut message = Message::new(topic, body);
    if let Some(tag) = tag {
        message = message.with_tag(tag);
    }
    if let Some(key) = key {
        message = message.with_key(key);
    }
    message
}

impl OrderedDispatcher {
    pub fn new(producer: Producer, settings: &ProducerSettings) -> Self {
        let (readiness, _) = watch::channel(Readiness::Starting);
        Self {
            producer,
            startup_attempts: settings.startup_attempts.max(1),
            startup_policy: RetryPolicy::new(
                2,
                Duration::from_millis(settings.startup_backoff_ms),
                Some(Duration::from_millis(settings.startup_backoff_ms.saturating_mul(8))),
            ),
            readiness,
            unkeyed_turn: AtomicUsize::new(0),
        }
    }

    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    /// Connects the producer, retrying transient failures with backoff up to
    /// the configured number of attempts. Any other failure is fatal at once.
    /// Sends are accepted only after this returns `Ok`.
    pub async fn start(&self) -> Result<(), DispatchError> {
        match self.readiness() {
            Readiness::Ready => return Ok(()),
            Readiness::Stopped => return Err(DispatchError::NotReady),
            Readiness::Starting | Readiness::Failed => {}
        }
        self.readiness.send_replace(Readiness::Starting);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.producer.start() {
                Ok(()) => {
                    self.readiness.send_replace(Readiness::Ready);
                    info!(group = self.producer.group(), attempt, "ordered dispatcher ready");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.startup_attempts => {
                    let backoff = self.startup_policy.time_until_next_retry(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.startup_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "producer failed to connect: {e}, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.readiness.send_replace(Readiness::Failed);
                    error!(attempt, "producer failed to start: {e}");
                    return Err(DispatchError::Startup(e));
                }
            }
        }
    }

    /// Waits until the startup loop has finished, successfully or not.
    pub async fn wait_ready(&self) -> Result<(), DispatchError> {
        let mut readiness = self.readiness.subscribe();
        let state = readiness
            .wait_for(|state| *state != Readiness::Starting)
            .await
            .map(|state| *state)
            .map_err(|_| DispatchError::NotReady)?;
        match state {
            Readiness::Ready => Ok(()),
            _ => Err(DispatchError::NotReady),
        }
    }

    /// Sends `body` to the partition owned by `correlation_key`.
    ///
    /// Returns once the message is queued; `callback` later receives the
    /// broker's result exactly once. A blank body is ignored: no broker call,
    /// no callback. Sends before the dispatcher is ready are rejected with
    /// [`DispatchError::NotReady`] and the callback is not invoked.
    pub fn send(
        &self,
        correlation_key: impl Into<CorrelationKey>,
        topic: &str,
        tag: Option<&str>,
        key: Option<&str>,
        body: impl Into<Bytes>,
        callback: SendCallback,
    ) -> Result<(), DispatchError> {
        let correlation_key = correlation_key.into();
        let Some(message) = self.prepare(topic, tag, key, body.into())? else {
            debug!(topic, %correlation_key, "blank body, nothing sent");
            return Ok(());
        };

        self.producer.send(
            message,
            Box::new(CorrelationKeySelector::new(correlation_key)),
            callback,
        )?;
        Ok(())
    }

    /// Sends `body` without a correlation key, spreading messages over the
    /// partitions round-robin. No ordering is guaranteed between such sends.
    pub fn send_unordered(
        &self,
        topic: &str,
        tag: Option<&str>,
        key: Option<&str>,
        body: impl Into<Bytes>,
        callback: SendCallback,
    ) -> Result<(), DispatchError> {
        let Some(message) = self.prepare(topic, tag, key, body.into())? else {
            debug!(topic, "blank body, nothing sent");
            return Ok(());
        };

        let turn = self.unkeyed_turn.fetch_add(1, Ordering::Relaxed);
        self.producer.send(
            message,
            Box::new(RoundRobinSelector::starting_at(turn)),
            callback,
        )?;
        Ok(())
    }

    fn prepare(
        &self,
        topic: &str,
        tag: Option<&str>,
        key: Option<&str>,
        body: Bytes,
    ) -> Result<Option<Message>, DispatchError> {
        if is_blank(&body) {
            return Ok(None);
        }
        if topic.trim().is_empty() {
            return Err(DispatchError::EmptyTopic);
        }
        if self.readiness() != Readiness::Ready {
            return Err(DispatchError::NotReady);
        }
        Ok(Some(build_message(topic, tag, key, body)))
    }

    /// Stops accepting sends and waits for queued sends to report.
    pub async fn stop(&self) {
        self.readiness.send_replace(Readiness::Stopped);
        self.producer.shutdown().await;
        info!(group = self.producer.group(), "ordered dispatcher stopped");
    }
}

/// Callback that only logs the result of a send.
pub fn log_outcome(correlation_key: impl Into<CorrelationKey>) -> SendCallback {
    let correlation_key = correlation_key.into();
    Box::new(move |result| match result {
        Ok(sent) => info!(
            %correlation_key,
            msg_id = %sent.msg_id,
            partition = %sent.partition,
            offset = sent.queue_offset,
            "send succeeded"
        ),
        Err(e) => error!(%correlation_key, "send failed: {e}"),
    })
}

//! Producer client
//!
//! `Producer` owns the connection to the broker and a single FIFO send queue.
//! `send` only enqueues; a background task drains the queue in submission
//! order, so two sends routed to the same partition are stored in the order
//! they were submitted. Each request is retried on transient broker failures
//! and its callback is invoked exactly once with the final result.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Message, PartitionId, SendResult};
use crate::config::ProducerSettings;
use crate::utils::error::ClientError;
use crate::utils::retry::RetryPolicy;

/// Completion callback of a send. Called exactly once.
pub type SendCallback = Box<dyn FnOnce(Result<SendResult, ClientError>) + Send + 'static>;

/// Picks the partition of a message from the partitions currently available.
pub trait PartitionSelector: Send + Sync {
    fn select(&self, partitions: &[PartitionId], message: &Message) -> Option<PartitionId>;
}

struct SendRequest {
    message: Message,
    selector: Box<dyn PartitionSelector>,
    callback: SendCallback,
}

enum ProducerState {
    Created,
    Running {
        queue: mpsc::UnboundedSender<SendRequest>,
        worker: JoinHandle<()>,
    },
    ShutDown,
}

pub struct Producer {
    broker: Arc<Broker>,
    namesrv_addr: String,
    settings: ProducerSettings,
    state: Mutex<ProducerState>,
}

impl Producer {
    pub fn new(broker: Arc<Broker>, namesrv_addr: impl Into<String>, settings: ProducerSettings) -> Self {
        Self {
            broker,
            namesrv_addr: namesrv_addr.into(),
            settings,
            state: Mutex::new(ProducerState::Created),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProducerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn group(&self) -> &str {
        &self.settings.group
    }

    /// Total attempts per message: the first one plus the configured retries.
    pub fn max_attempts(&self) -> u32 {
        self.settings.retry_times_when_send_failed.saturating_add(1)
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state(), ProducerState::Running { .. })
    }

    /// Connects to the broker and starts the send worker. Idempotent while running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut state = self.state();
        match *state {
            ProducerState::Running { .. } => return Ok(()),
            ProducerState::ShutDown => return Err(ClientError::ShutDown),
            ProducerState::Created => {}
        }

        self.broker.connect(&self.namesrv_addr)?;

        let (queue, requests) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_send_loop(
            self.broker.clone(),
            self.max_attempts(),
            RetryPolicy::fixed(Duration::from_millis(self.settings.retry_backoff_ms)),
            requests,
        ));
        *state = ProducerState::Running { queue, worker };

        info!(
            group = %self.settings.group,
            namesrv_addr = %self.namesrv_addr,
            "producer started"
        );
        Ok(())
    }

    /// Queues `message` for sending. Returns an error, without invoking
    /// `callback`, when the producer is not running.
    pub fn send(
        &self,
        message: Message,
        selector: Box<dyn PartitionSelector>,
        callback: SendCallback,
    ) -> Result<(), ClientError> {
        let state = self.state();
        let ProducerState::Running { queue, .. } = &*state else {
            return Err(match *state {
                ProducerState::ShutDown => ClientError::ShutDown,
                _ => ClientError::NotStarted,
            });
        };

        queue
            .send(SendRequest {
                message,
                selector,
                callback,
            })
            .map_err(|_| ClientError::ShutDown)
    }

    /// Stops accepting sends and waits until every queued send has reported.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state(), ProducerState::ShutDown);
        if let ProducerState::Running { queue, worker } = previous {
            drop(queue);
            if let Err(e) = worker.await {
                error!("producer send worker failed: {e}");
            }
            info!(group = %self.settings.group, "producer shut down");
        }
    }
}

async fn run_send_loop(
    broker: Arc<Broker>,
    max_attempts: u32,
    retry_policy: RetryPolicy,
    mut requests: mpsc::UnboundedReceiver<SendRequest>,
) {
    while let Some(request) = requests.recv().await {
        let result = send_with_retries(
            &broker,
            &request.message,
            request.selector.as_ref(),
            max_attempts,
            retry_policy,
        )
        .await;
        let callback = request.callback;
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(move || callback(result))) {
            error!(
                topic = %request.message.topic,
                "send callback panicked: {}",
                panic_message(panic.as_ref())
            );
        }
    }
    debug!("producer send queue closed");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn send_with_retries(
    broker: &Broker,
    message: &Message,
    selector: &dyn PartitionSelector,
    max_attempts: u32,
    retry_policy: RetryPolicy,
) -> Result<SendResult, ClientError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match send_once(broker, message, selector) {
            Ok(result) => return Ok(result),
            Err(ClientError::Broker(e)) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        if attempt >= max_attempts {
            return Err(ClientError::SendFailed {
                attempts: attempt,
                source: error,
            });
        }

        let backoff = retry_policy.time_until_next_retry(attempt - 1);
        warn!(
            topic = %message.topic,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            "send failed: {error}, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// One attempt: fetch the partitions fresh, select, append.
fn send_once(
    broker: &Broker,
    message: &Message,
    selector: &dyn PartitionSelector,
) -> Result<SendResult, ClientError> {
    let partitions = broker.partitions(&message.topic)?;
    let partition = selector
        .select(&partitions, message)
        .ok_or_else(|| ClientError::NoPartition(message.topic.clone()))?;
    Ok(broker.append(&partition, message.clone())?)
}

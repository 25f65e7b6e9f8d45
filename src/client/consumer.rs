//! Push consumer client
//!
//! `PushConsumer` joins a consumer group, works out which partitions it owns
//! and pushes batches from them to the registered [`BatchListener`]. Batches
//! run on the blocking pool, at most `consume_thread_max` at a time and never
//! two at once for the same partition. The listener's outcome is reported back
//! to the broker; a listener that panics is reported as a lost batch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::filter::Subscription;
use crate::broker::{BatchAck, Broker, MessageExt, PulledBatch};
use crate::config::ConsumerSettings;
use crate::consume::ConsumeOutcome;
use crate::utils::error::ClientError;

/// Receives the batches delivered to a push consumer.
pub trait BatchListener: Send + Sync + 'static {
    fn consume(&self, batch: &[MessageExt]) -> ConsumeOutcome;
}

enum ConsumerState {
    Created,
    Running {
        stop: watch::Sender<bool>,
        pull_loop: JoinHandle<()>,
    },
    ShutDown,
}

/// Everything the pull loop needs, shared with the batch tasks it spawns.
struct ConsumeContext {
    broker: Arc<Broker>,
    group: String,
    consumer_id: String,
    batch_max_size: usize,
    pull_interval: Duration,
    listener: Arc<dyn BatchListener>,
}

pub struct PushConsumer {
    broker: Arc<Broker>,
    namesrv_addr: String,
    consumer_id: String,
    settings: ConsumerSettings,
    subscriptions: Mutex<Vec<Subscription>>,
    listener: Mutex<Option<Arc<dyn BatchListener>>>,
    state: Mutex<ConsumerState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PushConsumer {
    pub fn new(broker: Arc<Broker>, namesrv_addr: impl Into<String>, settings: ConsumerSettings) -> Self {
        let consumer_id = format!("{}@{}", settings.group, Uuid::new_v4());
        Self {
            broker,
            namesrv_addr: namesrv_addr.into(),
            consumer_id,
            settings,
            subscriptions: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            state: Mutex::new(ConsumerState::Created),
        }
    }

    pub fn id(&self) -> &str {
        &self.consumer_id
    }

    pub fn group(&self) -> &str {
        &self.settings.group
    }

    /// Subscribes to `topic`, keeping messages whose tag matches `filter_expression`.
    pub fn subscribe(&self, topic: &str, filter_expression: &str) -> Result<(), ClientError> {
        let subscription = Subscription::parse(&format!("{topic}~{filter_expression}"))?;
        self.add_subscription(subscription);
        Ok(())
    }

    /// Subscribes to every `topic~tagFilter` pair of the settings.
    pub fn subscribe_configured(&self) -> Result<(), ClientError> {
        for subscription in self.settings.subscriptions()? {
            self.add_subscription(subscription);
        }
        Ok(())
    }

    fn add_subscription(&self, subscription: Subscription) {
        debug!(
            consumer_id = %self.consumer_id,
            topic = %subscription.topic,
            filter = %subscription.filter,
            "subscribed"
        );
        let mut subscriptions = lock(&self.subscriptions);
        subscriptions.retain(|existing| existing.topic != subscription.topic);
        subscriptions.push(subscription);
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.subscriptions).clone()
    }

    pub fn register_batch_handler(&self, listener: impl BatchListener) {
        *lock(&self.listener) = Some(Arc::new(listener));
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.state), ConsumerState::Running { .. })
    }

    /// Joins the group and starts pushing batches to the listener.
    ///
    /// Call this only once the rest of the application can cope with the
    /// listener's side effects. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        match *state {
            ConsumerState::Running { .. } => return Ok(()),
            ConsumerState::ShutDown => return Err(ClientError::ShutDown),
            ConsumerState::Created => {}
        }

        let listener = lock(&self.listener).clone().ok_or(ClientError::NoListener)?;
        let subscriptions = self.subscriptions();
        if subscriptions.is_empty() {
            return Err(ClientError::NoSubscription);
        }

        self.broker.connect(&self.namesrv_addr)?;
        self.broker.register_consumer(
            &self.settings.group,
            &self.consumer_id,
            &subscriptions,
            self.settings.consume_from_where,
        )?;

        let context = Arc::new(ConsumeContext {
            broker: self.broker.clone(),
            group: self.settings.group.clone(),
            consumer_id: self.consumer_id.clone(),
            batch_max_size: self.settings.message_batch_max_size,
            pull_interval: Duration::from_millis(self.settings.pull_interval_ms),
            listener,
        });
        let (stop, stopped) = watch::channel(false);
        let pull_loop = tokio::spawn(run_pull_loop(
            context,
            self.settings.consume_thread_max,
            stopped,
        ));
        *state = ConsumerState::Running { stop, pull_loop };

        info!(
            group = %self.settings.group,
            consumer_id = %self.consumer_id,
            topics = ?subscriptions.iter().map(|s| s.topic.as_str()).collect::<Vec<_>>(),
            "consumer started"
        );
        Ok(())
    }

    /// Stops pulling, waits for in-flight batches to report, and leaves the group.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), ConsumerState::ShutDown);
        if let ConsumerState::Running { stop, pull_loop } = previous {
            let _ = stop.send(true);
            if let Err(e) = pull_loop.await {
                error!("consumer pull loop failed: {e}");
            }
            self.broker
                .unregister_consumer(&self.settings.group, &self.consumer_id);
            info!(consumer_id = %self.consumer_id, "consumer shut down");
        }
    }
}

async fn run_pull_loop(
    context: Arc<ConsumeContext>,
    consume_thread_max: usize,
    mut stopped: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(consume_thread_max));
    let mut in_flight = JoinSet::new();

    while !*stopped.borrow() {
        match context
            .broker
            .assigned_partitions(&context.group, &context.consumer_id)
        {
            Ok(partitions) => {
                for partition in partitions {
                    // a worker slot is taken before the batch is locked
                    let permit = tokio::select! {
                        permit = permits.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                        _ = stopped.changed() => break,
                    };
                    match context
                        .broker
                        .pull(&context.group, &partition, context.batch_max_size)
                    {
                        Ok(Some(batch)) => {
                            in_flight.spawn(consume_batch(context.clone(), batch, permit));
                        }
                        Ok(None) => {}
                        Err(e) => debug!(%partition, "pull failed: {e}"),
                    }
                }
            }
            Err(e) => warn!(group = %context.group, "rebalance failed: {e}"),
        }

        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!("batch task failed: {e}");
            }
        }

        if *stopped.borrow() {
            break;
        }
        tokio::select! {
            changed = stopped.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = context.broker.wait_for_arrivals(context.pull_interval) => {}
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!("batch task failed: {e}");
        }
    }
}

async fn consume_batch(context: Arc<ConsumeContext>, batch: PulledBatch, _permit: OwnedSemaphorePermit) {
    let receipt = batch.receipt();
    let listener = context.listener.clone();
    let messages = batch.messages;

    let ack = match tokio::task::spawn_blocking(move || listener.consume(&messages)).await {
        Ok(outcome) => outcome.to_ack(),
        Err(e) => {
            error!(
                partition = %receipt.partition,
                size = receipt.offsets.len(),
                "batch listener crashed: {e}"
            );
            BatchAck::Lost
        }
    };

    if let Err(e) = context.broker.complete(&context.group, &receipt, ack) {
        error!(partition = %receipt.partition, "failed to report batch outcome: {e}");
    }
}

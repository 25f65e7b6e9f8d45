use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{
    CorrelationKey, CorrelationKeySelector, OrderedDispatcher, Readiness, RoundRobinSelector,
    index_for_hash, log_outcome, select_partition,
};
use crate::broker::{Broker, Message, PartitionId, SendResult};
use crate::client::{PartitionSelector, Producer, SendCallback};
use crate::config::{ProducerSettings, Settings};
use crate::utils::error::{BrokerError, ClientError, DispatchError};

const ORDER_ID: i64 = 15103111039;

fn producer_settings(startup_attempts: u32, startup_backoff_ms: u64) -> ProducerSettings {
    ProducerSettings {
        retry_times_when_send_failed: 2,
        retry_backoff_ms: 1,
        startup_attempts,
        startup_backoff_ms,
        ..Settings::default().producer
    }
}

fn dispatcher_on(broker: &Arc<Broker>, addr: &str, settings: ProducerSettings) -> OrderedDispatcher {
    let producer = Producer::new(broker.clone(), addr, settings.clone());
    OrderedDispatcher::new(producer, &settings)
}

fn broker() -> Arc<Broker> {
    Arc::new(Broker::new(Settings::default().broker))
}

type Results = mpsc::UnboundedReceiver<Result<SendResult, ClientError>>;

fn reporting() -> (impl Fn() -> SendCallback, Results) {
    let (tx, rx) = mpsc::unbounded_channel();
    let make = move || -> SendCallback {
        let tx = tx.clone();
        Box::new(move |result| {
            let _ = tx.send(result);
        })
    };
    (make, rx)
}

fn partitions(topic: &str, count: u32) -> Vec<PartitionId> {
    (0..count).map(|id| PartitionId::new(topic, id)).collect()
}

#[test]
fn test_selection_is_deterministic_and_in_bounds() {
    let keys = [
        CorrelationKey::from(ORDER_ID),
        CorrelationKey::from(-1_i64),
        CorrelationKey::from(i64::MIN),
        CorrelationKey::from(i64::MAX),
        CorrelationKey::from("order-7"),
        CorrelationKey::from(""),
    ];
    for key in &keys {
        for n in 1..=16 {
            let first = select_partition(key, n).unwrap();
            assert_eq!(select_partition(key, n), Some(first));
            assert!(first < n, "{key} -> {first} with {n} partitions");
        }
    }
}

#[test]
fn test_negative_hashes_map_into_range() {
    assert_eq!(index_for_hash(-7, 4), Some(3));
    assert_eq!(index_for_hash(7, 4), Some(3));
    assert_eq!(index_for_hash(i64::MIN, 4), Some(0));
    assert_eq!(index_for_hash(i64::MIN, 3), Some(2));
    assert_eq!(index_for_hash(-1, 1), Some(0));
}

#[test]
fn test_no_partitions_selects_nothing() {
    assert_eq!(select_partition(&CorrelationKey::from(ORDER_ID), 0), None);
    let selector = CorrelationKeySelector::new(ORDER_ID.into());
    assert_eq!(selector.select(&[], &Message::new("orders", "m0")), None);
}

#[test]
fn test_same_key_three_times_same_partition() {
    let key = CorrelationKey::from(ORDER_ID);
    let index = select_partition(&key, 4).unwrap();
    for _ in 0..3 {
        assert_eq!(select_partition(&key, 4), Some(index));
    }
    // a different partition count may move the key; it only has to stay in range
    assert!(select_partition(&key, 8).unwrap() < 8);
}

#[test]
fn test_integer_and_string_keys_route_alike() {
    let int = CorrelationKey::from(ORDER_ID);
    let text = CorrelationKey::from(ORDER_ID.to_string());
    assert_ne!(int, text);
    assert_eq!(int.stable_hash(), text.stable_hash());
    assert_eq!(select_partition(&int, 4), select_partition(&text, 4));
}

#[test]
fn test_selector_uses_the_given_partition_list() {
    let selector = CorrelationKeySelector::new(ORDER_ID.into());
    let message = Message::new("orders", "m0");
    let index = select_partition(&ORDER_ID.into(), 4).unwrap();
    assert_eq!(
        selector.select(&partitions("orders", 4), &message),
        Some(PartitionId::new("orders", index as u32))
    );
}

#[test]
fn test_round_robin_cycles() {
    let selector = RoundRobinSelector::default();
    let message = Message::new("orders", "m0");
    let picked: Vec<u32> = (0..6)
        .map(|_| selector.select(&partitions("orders", 3), &message).unwrap().queue_id)
        .collect();
    assert_eq!(picked, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(selector.select(&[], &message), None);
}

#[tokio::test]
async fn test_blank_body_is_a_silent_no_op() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    let (callback, mut results) = reporting();

    // accepted even before the dispatcher is ready
    dispatcher
        .send(ORDER_ID, "orders", None, None, "", callback())
        .unwrap();

    dispatcher.start().await.unwrap();
    dispatcher
        .send(ORDER_ID, "orders", Some("TagA"), None, " \n\t", callback())
        .unwrap();
    dispatcher
        .send_unordered("orders", None, None, "", callback())
        .unwrap();
    dispatcher.stop().await;

    drop(callback);
    assert!(results.recv().await.is_none(), "no callback for blank bodies");
    assert!(matches!(
        broker.read(&PartitionId::new("orders", 0), 0, 10),
        Err(BrokerError::UnknownPartition(_))
    ));
}

#[tokio::test]
async fn test_send_before_ready_is_rejected() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    assert_eq!(dispatcher.readiness(), Readiness::Starting);

    let (callback, mut results) = reporting();
    let result = dispatcher.send(ORDER_ID, "orders", None, None, "created", callback());
    assert!(matches!(result, Err(DispatchError::NotReady)));

    drop(callback);
    assert!(results.recv().await.is_none());
}

#[tokio::test]
async fn test_empty_topic_is_rejected() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    dispatcher.start().await.unwrap();

    let result = dispatcher.send(ORDER_ID, "  ", None, None, "created", log_outcome(ORDER_ID));
    assert!(matches!(result, Err(DispatchError::EmptyTopic)));
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_startup_retries_until_broker_is_available() {
    let broker = broker();
    broker.set_available(false);
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(50, 5));

    let recovering = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        recovering.set_available(true);
    });

    let (started, ready) = tokio::join!(dispatcher.start(), dispatcher.wait_ready());
    started.unwrap();
    ready.unwrap();
    assert_eq!(dispatcher.readiness(), Readiness::Ready);
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_startup_gives_up_after_configured_attempts() {
    let broker = broker();
    broker.set_available(false);
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(3, 1));

    let err = dispatcher.start().await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Startup(ClientError::Broker(BrokerError::Unavailable))
    ));
    assert_eq!(dispatcher.readiness(), Readiness::Failed);
    assert!(matches!(dispatcher.wait_ready().await, Err(DispatchError::NotReady)));

    broker.set_available(true);
    dispatcher.start().await.unwrap();
    assert_eq!(dispatcher.readiness(), Readiness::Ready);
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_unknown_address_is_fatal_without_retries() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "10.1.1.1:9876", producer_settings(5, 10_000));

    let err = timeout(Duration::from_secs(1), dispatcher.start())
        .await
        .expect("no backoff for a fatal error")
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Startup(ClientError::Broker(BrokerError::UnknownAddress(_)))
    ));
    assert_eq!(dispatcher.readiness(), Readiness::Failed);
}

#[tokio::test]
async fn test_messages_sharing_a_key_keep_send_order() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    dispatcher.start().await.unwrap();
    let (callback, mut results) = reporting();

    let sends = [
        (15103111039_i64, "created"),
        (15103111065, "created"),
        (15103111039, "paid"),
        (15103117235, "created"),
        (15103111065, "paid"),
        (15103111039, "pushed"),
        (15103111039, "completed"),
    ];
    for (order_id, step) in sends {
        let key = format!("KEY{order_id}");
        dispatcher
            .send(
                order_id,
                "orders",
                Some("TagA"),
                Some(key.as_str()),
                format!("{order_id}:{step}"),
                callback(),
            )
            .unwrap();
    }

    let mut placed: HashMap<u32, Vec<u64>> = HashMap::new();
    for _ in 0..sends.len() {
        let sent = timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        placed.entry(sent.partition.queue_id).or_default().push(sent.queue_offset);
    }
    // callbacks arrive in send order, so offsets grow per partition
    assert!(placed.values().all(|offsets| offsets.windows(2).all(|w| w[0] < w[1])));
    dispatcher.stop().await;

    for order_id in [15103111039_i64, 15103111065, 15103117235] {
        let index = select_partition(&order_id.into(), 4).unwrap() as u32;
        let key = format!("KEY{order_id}");
        let stored = broker
            .read(&PartitionId::new("orders", index), 0, 100)
            .unwrap();
        let steps: Vec<String> = stored
            .iter()
            .filter(|m| m.key() == Some(key.as_str()))
            .map(|m| String::from_utf8_lossy(m.body()).into_owned())
            .collect();
        let expected: Vec<String> = sends
            .iter()
            .filter(|(id, _)| *id == order_id)
            .map(|(id, step)| format!("{id}:{step}"))
            .collect();
        assert_eq!(steps, expected);
        assert!(stored.iter().all(|m| m.tag() == Some("TagA")));
    }
}

#[tokio::test]
async fn test_send_failure_reaches_the_callback() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    dispatcher.start().await.unwrap();
    broker.set_available(false);
    let (callback, mut results) = reporting();

    // send itself succeeds; the failure is reported asynchronously
    dispatcher
        .send(ORDER_ID, "orders", None, None, "created", callback())
        .unwrap();
    let result = timeout(Duration::from_secs(5), results.recv()).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ClientError::SendFailed { attempts: 3, source: BrokerError::Unavailable })
    ));
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_unordered_sends_spread_over_partitions() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    dispatcher.start().await.unwrap();
    let (callback, mut results) = reporting();

    for i in 0..8 {
        dispatcher
            .send_unordered("events", None, None, format!("e{i}"), callback())
            .unwrap();
    }
    let mut per_partition: HashMap<u32, usize> = HashMap::new();
    for _ in 0..8 {
        let sent = timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        *per_partition.entry(sent.partition.queue_id).or_default() += 1;
    }
    assert_eq!(per_partition.len(), 4);
    assert!(per_partition.values().all(|count| *count == 2));
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_rebalance_uses_fresh_partition_list() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    dispatcher.start().await.unwrap();
    let (callback, mut results) = reporting();

    broker.set_partition_count("orders", 8).unwrap();
    dispatcher
        .send(ORDER_ID, "orders", None, None, "created", callback())
        .unwrap();
    let sent = timeout(Duration::from_secs(5), results.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let expected = select_partition(&ORDER_ID.into(), 8).unwrap() as u32;
    assert_eq!(sent.partition.queue_id, expected);
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_stop_rejects_further_sends() {
    let broker = broker();
    let dispatcher = dispatcher_on(&broker, "127.0.0.1:9876", producer_settings(1, 1));
    dispatcher.start().await.unwrap();
    dispatcher.stop().await;

    assert_eq!(dispatcher.readiness(), Readiness::Stopped);
    let result = dispatcher.send(ORDER_ID, "orders", None, None, "late", log_outcome(ORDER_ID));
    assert!(matches!(result, Err(DispatchError::NotReady)));
    assert!(matches!(dispatcher.start().await, Err(DispatchError::NotReady)));
}

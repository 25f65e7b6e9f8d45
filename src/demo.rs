//! Demo order flow used by the binary.
//!
//! Orders go through create, pay, push and complete steps. Every step is
//! sent with the order id as correlation key, so the steps of one order are
//! consumed in the order they were produced while different orders may
//! interleave.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::MessageExt;
use crate::client::SendCallback;
use crate::consume::MessageHandler;
use crate::dispatch::{OrderedDispatcher, log_outcome};
use crate::utils::error::{DispatchError, HandlerError};

/// Tags cycled over the demo orders.
pub const DEMO_TAGS: [&str; 3] = ["TagA", "TagC", "TagD"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub order_id: i64,
    pub desc: String,
}

impl OrderEvent {
    pub fn new(order_id: i64, desc: &str) -> Self {
        Self {
            order_id,
            desc: desc.to_string(),
        }
    }
}

/// Ten steps of three interleaved orders.
pub fn sample_orders() -> Vec<OrderEvent> {
    [
        (15103111039, "created"),
        (15103111065, "created"),
        (15103111039, "paid"),
        (15103117235, "created"),
        (15103111065, "paid"),
        (15103117235, "paid"),
        (15103111065, "completed"),
        (15103111039, "pushed"),
        (15103117235, "completed"),
        (15103111039, "completed"),
    ]
    .into_iter()
    .map(|(order_id, desc)| OrderEvent::new(order_id, desc))
    .collect()
}

/// Sends `order` as JSON, keyed by its order id.
pub fn dispatch_order(
    dispatcher: &OrderedDispatcher,
    topic: &str,
    tag: &str,
    key: &str,
    order: &OrderEvent,
    callback: SendCallback,
) -> Result<(), DispatchError> {
    let body = serde_json::to_vec(order)?;
    dispatcher.send(order.order_id, topic, Some(tag), Some(key), body, callback)
}

/// Sends the first `count` orders of `orders`, cycling the demo tags and
/// logging each send result. Returns how many sends were queued.
pub fn dispatch_orders(
    dispatcher: &OrderedDispatcher,
    topic: &str,
    orders: &[OrderEvent],
) -> Result<usize, DispatchError> {
    for (i, order) in orders.iter().enumerate() {
        let tag = DEMO_TAGS[i % DEMO_TAGS.len()];
        let key = format!("KEY{i}");
        dispatch_order(dispatcher, topic, tag, &key, order, log_outcome(order.order_id))?;
    }
    Ok(orders.len())
}

/// Logs every order event it receives.
#[derive(Debug, Default)]
pub struct OrderLogHandler;

impl MessageHandler for OrderLogHandler {
    fn handle(&self, message: &MessageExt) -> Result<(), HandlerError> {
        let order: OrderEvent = serde_json::from_str(std::str::from_utf8(message.body())?)?;
        info!(
            order_id = order.order_id,
            desc = %order.desc,
            msg_id = %message.msg_id,
            partition = %message.partition,
            offset = message.queue_offset,
            reconsume_count = message.reconsume_count,
            "order event received"
        );
        Ok(())
    }
}

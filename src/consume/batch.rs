use tracing::{debug, info, warn};

use crate::broker::MessageExt;
use crate::client::consumer::BatchListener;
use crate::consume::outcome::ConsumeOutcome;
use crate::utils::error::HandlerError;

/// Business action applied to one message.
///
/// Handlers run on a broker-managed worker and may block, but must return:
/// a handler that never returns is indistinguishable from a crashed consumer
/// and its batch is redelivered without bound. Messages can arrive more than
/// once, so handlers should be idempotent.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &MessageExt) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&MessageExt) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &MessageExt) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Handles `batch` in order, stopping at the first failure.
pub fn process_batch<H>(batch: &[MessageExt], handler: &H) -> ConsumeOutcome
where
    H: MessageHandler + ?Sized,
{
    let failure = batch.iter().enumerate().find_map(|(index, message)| {
        if message.reconsume_count > 0 {
            debug!(
                msg_id = %message.msg_id,
                reconsume_count = message.reconsume_count,
                "handling redelivered message"
            );
        }
        handler.handle(message).err().map(|err| (index, message, err))
    });

    let outcome = match failure {
        None => ConsumeOutcome::success(batch.len()),
        Some((index, message, err)) => {
            warn!(
                msg_id = %message.msg_id,
                partition = %message.partition,
                offset = message.queue_offset,
                reconsume_count = message.reconsume_count,
                error = %err,
                "message handling failed, stopping batch"
            );
            ConsumeOutcome::reconsume_later(index)
        }
    };

    info!(
        handled = outcome.handled(),
        batch_size = batch.len(),
        status = ?outcome.status,
        ack_boundary = outcome.ack_boundary,
        "batch processed"
    );
    outcome
}

/// Batch listener that runs every batch through a [`MessageHandler`].
pub struct BatchConsumer<H> {
    handler: H,
}

impl<H: MessageHandler> BatchConsumer<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn process(&self, batch: &[MessageExt]) -> ConsumeOutcome {
        process_batch(batch, &self.handler)
    }
}

impl<H: MessageHandler + 'static> BatchListener for BatchConsumer<H> {
    fn consume(&self, batch: &[MessageExt]) -> ConsumeOutcome {
        self.process(batch)
    }
}

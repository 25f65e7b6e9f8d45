use crate::broker::BatchAck;

/// Verdict reported for one batch invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeStatus {
    ConsumeSuccess,
    ReconsumeLater,
}

/// Status plus ack boundary of one batch invocation.
///
/// On success the boundary is the batch length. When the message at index
/// `i` fails the boundary is `i + 1`: every message before `i` is done, while
/// the failed message and everything after it go back to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub status: ConsumeStatus,
    pub ack_boundary: usize,
}

impl ConsumeOutcome {
    pub fn success(batch_len: usize) -> Self {
        Self {
            status: ConsumeStatus::ConsumeSuccess,
            ack_boundary: batch_len,
        }
    }

    pub fn reconsume_later(failed_index: usize) -> Self {
        Self {
            status: ConsumeStatus::ReconsumeLater,
            ack_boundary: failed_index + 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ConsumeStatus::ConsumeSuccess
    }

    /// Number of messages handled successfully.
    pub fn handled(&self) -> usize {
        match self.status {
            ConsumeStatus::ConsumeSuccess => self.ack_boundary,
            ConsumeStatus::ReconsumeLater => self.ack_boundary.saturating_sub(1),
        }
    }

    /// Index of the first message the broker must deliver again.
    pub fn redeliver_from(&self) -> Option<usize> {
        match self.status {
            ConsumeStatus::ConsumeSuccess => None,
            ConsumeStatus::ReconsumeLater => Some(self.ack_boundary.saturating_sub(1)),
        }
    }

    /// Translates the outcome into the broker's settle instruction.
    pub fn to_ack(&self) -> BatchAck {
        match self.redeliver_from() {
            None => BatchAck::Consumed,
            Some(index) => BatchAck::RedeliverFrom(index),
        }
    }
}

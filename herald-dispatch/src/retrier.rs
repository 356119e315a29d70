//! Re-enqueuing failed messages on request

use herald_common::internal;

use crate::{
    error::DispatchError,
    message::{CorrelationId, Message},
    queue::AdmissionQueue,
};

/// Pushes a previously failed message back onto the admission queue
///
/// No ceiling is enforced here; callers decide whether a message deserves
/// another attempt by looking at `ErrorRecord::retry_count`.
pub(crate) struct Retrier {
    queue: AdmissionQueue,
}

impl Retrier {
    pub(crate) const fn new(queue: AdmissionQueue) -> Self {
        Self { queue }
    }

    /// Queue a new message built from the given fields, with its retry
    /// count one higher than `retry_count`
    ///
    /// Waits for space if the admission queue is full.
    pub(crate) async fn retry(
        &self,
        content: String,
        correlation_id: CorrelationId,
        index: usize,
        retry_count: u32,
    ) -> Result<(), DispatchError> {
        let attempt = retry_count.saturating_add(1);
        let message = Message::new(content, correlation_id, index, attempt)
            .ok_or(DispatchError::EmptyContent)?;

        internal!(
            level = DEBUG,
            "Retry[{}]: GUID={} index={}",
            attempt,
            message.correlation_id(),
            index
        );

        self.queue.push(message).await
    }
}

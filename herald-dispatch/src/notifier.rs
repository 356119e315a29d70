//! Accepting batches of notifications

use herald_common::internal;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use crate::{
    error::DispatchError,
    message::{CorrelationId, Message},
    queue::AdmissionQueue,
};

/// Turns a batch of strings into queued messages sharing one correlation id
pub(crate) struct Notifier {
    queue: AdmissionQueue,
    ids: Mutex<ulid::Generator>,
    runtime: Handle,
    /// Push tasks that may not have queued their batch yet
    pushes: TaskTracker,
}

impl Notifier {
    pub(crate) fn new(queue: AdmissionQueue, runtime: Handle) -> Self {
        Self {
            queue,
            ids: Mutex::new(ulid::Generator::new()),
            runtime,
            pushes: TaskTracker::new(),
        }
    }

    /// Queue every non-empty entry of `messages`
    ///
    /// Returns as soon as the correlation id exists. Queuing happens on a
    /// background task, so the messages may not all be queued yet when this
    /// returns. An empty batch yields the empty id and queues nothing.
    pub(crate) fn notify(&self, messages: Vec<String>) -> Result<CorrelationId, DispatchError> {
        if messages.is_empty() {
            return Ok(CorrelationId::default());
        }

        let correlation_id = self.next_id()?;
        let queue = self.queue.clone();
        let batch_id = correlation_id.clone();

        let push = async move {
            let total = messages.len();
            let mut queued = 0;

            for (index, content) in messages.into_iter().enumerate() {
                let Some(message) = Message::new(content, batch_id.clone(), index, 0) else {
                    internal!(level = DEBUG, "Skipping empty message[{}] of {}", index, batch_id);
                    continue;
                };

                if queue.push(message).await.is_err() {
                    tracing::error!(
                        correlation_id = %batch_id,
                        index,
                        "Admission queue closed while queuing batch"
                    );
                    return;
                }
                queued += 1;
            }

            internal!(
                level = DEBUG,
                "{} of {} messages of {} queued",
                queued,
                total,
                batch_id
            );
        };
        self.pushes.spawn_on(push, &self.runtime);

        Ok(correlation_id)
    }

    /// Tracker of the push tasks still running
    ///
    /// Closed by the service once no further batches can be accepted, so that
    /// the shutdown flush can tell when every accepted batch is queued.
    pub(crate) fn pushes(&self) -> &TaskTracker {
        &self.pushes
    }

    fn next_id(&self) -> Result<CorrelationId, DispatchError> {
        self.ids
            .lock()
            .generate()
            .map(CorrelationId::from)
            .map_err(|e| DispatchError::IdGeneration(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn notifier() -> (Notifier, AdmissionQueue) {
        let queue = AdmissionQueue::new(16);
        (Notifier::new(queue.clone(), Handle::current()), queue)
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let (notifier, queue) = notifier();

        let id = notifier.notify(Vec::new()).unwrap();
        assert!(id.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_messages_keep_batch_index_and_id() {
        let (notifier, queue) = notifier();

        let id = notifier
            .notify(vec!["a".to_string(), String::new(), "c".to_string()])
            .unwrap();
        assert!(!id.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 2);

        let first = queue.pop().await.unwrap();
        assert_eq!(first.content(), "a");
        assert_eq!(first.index(), 0);
        assert_eq!(first.retry_count(), 0);
        assert_eq!(first.correlation_id(), &id);

        let second = queue.pop().await.unwrap();
        assert_eq!(second.content(), "c");
        assert_eq!(second.index(), 2);
    }

    #[tokio::test]
    async fn test_every_batch_gets_a_fresh_id() {
        let (notifier, _queue) = notifier();

        let first = notifier.notify(vec!["a".to_string()]).unwrap();
        let second = notifier.notify(vec!["b".to_string()]).unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_pushes_are_tracked_until_queued() {
        let queue = AdmissionQueue::new(1);
        let notifier = Notifier::new(queue.clone(), Handle::current());

        notifier
            .notify(vec!["a".to_string(), "b".to_string()])
            .unwrap();
        notifier.pushes().close();

        tokio::time::sleep(Duration::from_millis(50)).await;
        // The second message waits for space
        assert_eq!(notifier.pushes().len(), 1);

        queue.pop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), notifier.pushes().wait())
            .await
            .unwrap();
        assert_eq!(queue.pop().await.unwrap().content(), "b");
    }

    #[tokio::test]
    async fn test_batch_of_only_empty_strings_queues_nothing() {
        let (notifier, queue) = notifier();

        let id = notifier.notify(vec![String::new(), String::new()]).unwrap();
        assert!(!id.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty());
    }
}

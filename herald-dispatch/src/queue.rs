//! Admission and error queues

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, mpsc};

use crate::{error::DispatchError, message::{ErrorRecord, Message}};

/// Bounded queue of messages waiting to be admitted by the rate limiter
///
/// Cloning yields another handle onto the same queue. Producers wait while
/// the queue is full. The single receiver sits behind an async mutex so that
/// the listen loop and the shutdown flush can take turns consuming.
#[derive(Debug, Clone)]
pub(crate) struct AdmissionQueue {
    tx: mpsc::Sender<Message>,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
}

impl AdmissionQueue {
    /// `capacity` must be non-zero; configuration normalisation guarantees it.
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Push a message, waiting for space if the queue is full
    pub(crate) async fn push(&self, message: Message) -> Result<(), DispatchError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Wait for the next message
    pub(crate) async fn pop(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }

    /// Exclusive access to the receiving side, for draining
    pub(crate) async fn receiver(&self) -> MutexGuard<'_, mpsc::Receiver<Message>> {
        self.rx.lock().await
    }

    /// Number of messages currently queued (including producers that have
    /// reserved a slot)
    pub(crate) fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Build the error queue, returning the producer used by the dispatcher and
/// the read handle given to callers
pub(crate) fn error_queue(capacity: usize) -> (mpsc::Sender<ErrorRecord>, ErrorChannel) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        tx,
        ErrorChannel {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Read access to the failures reported by the dispatcher
///
/// Callers are expected to drain this continuously. Once it fills up,
/// senders wait for space, which in turn stalls admission.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    rx: Arc<Mutex<mpsc::Receiver<ErrorRecord>>>,
}

impl ErrorChannel {
    /// Wait for the next failure
    ///
    /// Returns `None` once the dispatcher has gone away and every pending
    /// record has been read.
    pub async fn recv(&self) -> Option<ErrorRecord> {
        self.rx.lock().await.recv().await
    }

    /// Take a failure if one is ready
    ///
    /// Also returns `None` if another handle is currently waiting in [`recv`](Self::recv).
    pub fn try_recv(&self) -> Option<ErrorRecord> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

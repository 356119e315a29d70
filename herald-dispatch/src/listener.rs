//! Rate-limited consumption of the admission queue

use std::{sync::Arc, time::Duration};

use herald_common::internal;
use serde::Serialize;
use tokio::{
    sync::{Semaphore, mpsc::error::TryRecvError},
    time::Instant,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    queue::AdmissionQueue,
    rate_limiter::{RateLimitStats, RateLimiter},
    sender::{Delivery, Dispatcher},
};

/// Outcome of draining the admission queue during shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Messages handed to the dispatcher and completed before the deadline
    pub flushed: usize,
    /// Of the flushed messages, those whose send failed and were reported
    /// on the error channel
    pub failed: usize,
    /// Messages not sent when flushing stopped, including a send abandoned
    /// at the deadline
    pub remaining: usize,
    /// Whether the deadline cut the flush short
    pub timed_out: bool,
    /// Time spent flushing
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Admits queued messages through the token bucket and hands them to the
/// dispatcher without waiting for the sends to finish
pub(crate) struct Listener {
    queue: AdmissionQueue,
    limiter: RateLimiter,
    dispatcher: Dispatcher,
    /// Present when the configuration caps concurrent sends
    in_flight_limit: Option<Arc<Semaphore>>,
    tasks: TaskTracker,
}

impl Listener {
    pub(crate) fn new(
        queue: AdmissionQueue,
        limiter: RateLimiter,
        dispatcher: Dispatcher,
        max_in_flight: Option<usize>,
    ) -> Self {
        Self {
            queue,
            limiter,
            dispatcher,
            in_flight_limit: max_in_flight.map(|limit| Arc::new(Semaphore::new(limit))),
            tasks: TaskTracker::new(),
        }
    }

    /// Run the admission loop until `shutdown` is cancelled
    ///
    /// Cancellation is only observed between admissions. A message already
    /// taken from the queue is still admitted and sent, and sends already
    /// running are never interrupted.
    pub(crate) async fn listen(&self, shutdown: CancellationToken) {
        internal!(level = INFO, "Listener started");

        loop {
            let message = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    internal!(level = INFO, "Listener received shutdown signal");
                    break;
                }
                message = self.queue.pop() => message,
            };

            let Some(message) = message else {
                internal!(level = WARN, "Admission queue closed, listener stopping");
                break;
            };

            self.limiter.acquire().await;

            let permit = match &self.in_flight_limit {
                Some(limit) => match Arc::clone(limit).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                None => None,
            };

            let dispatcher = self.dispatcher.clone();
            self.tasks.spawn(async move {
                let _permit = permit;
                dispatcher.send(message).await;
            });
        }

        internal!(
            level = DEBUG,
            "Listener stopped with {} sends still in flight",
            self.tasks.len()
        );
    }

    /// Drain the admission queue, sending each message in turn and waiting
    /// for it, without rate limiting
    ///
    /// Batches still being queued by `pending_pushes` are waited for, so
    /// flushing only stops once that tracker is closed and empty and the
    /// queue is drained, or once `timeout` has elapsed. A send that is
    /// running when the deadline passes is abandoned and counted as remaining.
    pub(crate) async fn flush(
        &self,
        timeout: Duration,
        pending_pushes: &TaskTracker,
    ) -> FlushReport {
        let start = Instant::now();
        let mut flushed = 0;
        let mut failed = 0;
        let mut sending = false;

        internal!(
            level = DEBUG,
            "Flushing {} queued messages within {:?}",
            self.queue.len(),
            timeout
        );

        let drained = tokio::time::timeout(timeout, async {
            let mut receiver = self.queue.receiver().await;
            loop {
                let message = match receiver.try_recv() {
                    Ok(message) => message,
                    Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) if pending_pushes.is_empty() => break,
                    Err(TryRecvError::Empty) => {
                        tokio::select! {
                            biased;
                            message = receiver.recv() => match message {
                                Some(message) => message,
                                None => break,
                            },
                            () = pending_pushes.wait() => continue,
                        }
                    }
                };

                sending = true;
                match self.dispatcher.send(message).await {
                    Delivery::Delivered(status) => tracing::trace!(%status, "Flushed message"),
                    Delivery::Reported => failed += 1,
                }
                sending = false;
                flushed += 1;
            }
        })
        .await;

        let report = FlushReport {
            flushed,
            failed,
            remaining: self.queue.len() + usize::from(sending),
            timed_out: drained.is_err(),
            elapsed: start.elapsed(),
        };

        if report.timed_out {
            tracing::warn!(
                flushed = report.flushed,
                remaining = report.remaining,
                "Timeout reached while flushing notifications"
            );
        } else {
            internal!(
                level = INFO,
                "Flushed {} messages, {} failed",
                report.flushed,
                report.failed
            );
        }

        report
    }

    /// Number of sends spawned by the loop that have not finished yet
    pub(crate) fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn limiter_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }
}

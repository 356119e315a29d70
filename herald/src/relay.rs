//! Forwarding lines from an input stream to the dispatcher

use std::{sync::Arc, time::Duration};

use herald_common::{Signal, incoming, internal};
use herald_dispatch::{FlushReport, Herald};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::{broadcast, mpsc},
    time::MissedTickBehavior,
};

/// How the relay batches lines and handles failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// How often buffered lines are submitted
    pub interval: Duration,
    /// Capacity of the line buffer; the reader waits when it is full
    pub line_capacity: usize,
    /// Failed messages with a lower retry count than this are retried
    pub retrials: u32,
    /// Maximum number of lines per submitted batch
    pub max_batch: usize,
    /// Deadline for flushing queued messages on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            line_capacity: 500,
            retrials: 2,
            max_batch: 100,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Reads lines, submits them in batches and retries failures until told to
/// shut down, either by a [`Signal::Shutdown`] or by the end of the input
pub struct Relay {
    herald: Arc<Herald>,
    options: RelayOptions,
    signals: broadcast::Sender<Signal>,
}

impl Relay {
    pub fn new(herald: Herald, options: RelayOptions) -> Self {
        let (signals, _receiver) = broadcast::channel(16);
        Self {
            herald: Arc::new(herald),
            options,
            signals,
        }
    }

    /// Sender used to ask the relay to shut down
    pub fn signals(&self) -> broadcast::Sender<Signal> {
        self.signals.clone()
    }

    pub fn herald(&self) -> &Herald {
        &self.herald
    }

    /// Relay `input` until shutdown, then flush and return the flush report
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher cannot start listening or the
    /// flush task fails.
    pub async fn run<R>(self, input: R) -> anyhow::Result<FlushReport>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let mut shutdown = self.signals.subscribe();
        let (lines_tx, mut lines) = mpsc::channel(self.options.line_capacity.max(1));

        self.herald.start_listening()?;

        let reader = tokio::spawn(read_lines(input, lines_tx, self.signals.clone()));
        let error_handler = tokio::spawn(handle_errors(
            Arc::clone(&self.herald),
            self.options.retrials,
            self.signals.subscribe(),
        ));

        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                signal = shutdown.recv() => {
                    match signal {
                        Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        Ok(signal) => tracing::debug!("Received {signal:?}"),
                        Err(e) => tracing::debug!("Received: {e:?}"),
                    }
                }
                _ = ticker.tick() => {
                    self.submit(&mut lines);
                }
            }
        }

        internal!(level = INFO, "Shutting down, submitting buffered lines");
        while self.submit(&mut lines) > 0 {}
        drop(lines);

        let report = self
            .herald
            .terminate(self.options.shutdown_timeout)
            .await
            .map_err(|e| anyhow::anyhow!("Flush task failed: {e}"))?;

        internal!(
            level = INFO,
            "Flushed {} messages ({} failed) in {:?}, {} left unsent",
            report.flushed,
            report.failed,
            report.elapsed,
            report.remaining
        );

        self.signals.send(Signal::Finalised).ok();

        if let Err(e) = reader.await {
            tracing::error!(error = %e, "Input reader task failed");
        }
        if let Err(e) = error_handler.await {
            tracing::error!(error = %e, "Error handler task failed");
        }

        Ok(report)
    }

    /// Take up to one batch of lines from the buffer and notify them
    ///
    /// Returns how many lines were taken, empty ones included.
    fn submit(&self, lines: &mut mpsc::Receiver<String>) -> usize {
        let limit = self.options.max_batch.max(1);
        let mut taken = 0;
        let mut batch = Vec::with_capacity(limit);

        while taken < limit {
            let Ok(line) = lines.try_recv() else {
                break;
            };
            taken += 1;
            if !line.is_empty() {
                batch.push(line);
            }
        }

        if batch.is_empty() {
            return taken;
        }

        let size = batch.len();
        match self.herald.notify(batch) {
            Ok(id) => internal!(level = INFO, "Submitted {} lines as {}", size, id),
            Err(e) => tracing::error!(error = %e, lines = size, "Unable to submit batch"),
        }

        taken
    }
}

/// Push each line of `input` into the line buffer until the input ends or a
/// signal arrives
///
/// Reaching the end of the input asks the whole relay to shut down.
async fn read_lines<R>(input: R, lines: mpsc::Sender<String>, signals: broadcast::Sender<Signal>)
where
    R: AsyncBufRead + Unpin,
{
    let mut shutdown = signals.subscribe();
    let mut input = input.lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            line = input.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                incoming!("{}", line);
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                internal!(level = INFO, "End of input reached");
                signals.send(Signal::Shutdown).ok();
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                signals.send(Signal::Shutdown).ok();
                break;
            }
        }
    }
}

/// Retry failed messages below the retry ceiling, drop the rest
///
/// Keeps running while the dispatcher flushes, so that failures during the
/// flush are still read, and stops on [`Signal::Finalised`].
async fn handle_errors(herald: Arc<Herald>, retrials: u32, mut signals: broadcast::Receiver<Signal>) {
    let errors = herald.error_channel();

    loop {
        let record = tokio::select! {
            biased;
            signal = signals.recv() => match signal {
                Ok(Signal::Finalised) | Err(broadcast::error::RecvError::Closed) => break,
                _ => continue,
            },
            record = errors.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        if record.retry_count < retrials {
            internal!(level = DEBUG, "Retrying {}", record);
            if let Err(e) = herald.retry_record(record).await {
                tracing::error!(error = %e, "Unable to retry message");
            }
        } else {
            tracing::error!(
                correlation_id = %record.correlation_id,
                index = record.index,
                retry_count = record.retry_count,
                error = %record.description,
                "Dropping message after too many attempts"
            );
        }
    }

    while let Some(record) = errors.try_recv() {
        tracing::error!(
            correlation_id = %record.correlation_id,
            index = record.index,
            error = %record.description,
            "Dropping message, the relay has shut down"
        );
    }
}

/// Broadcast [`Signal::Shutdown`] on SIGINT or SIGTERM
///
/// # Errors
///
/// Returns an error if the SIGTERM handler cannot be installed.
#[cfg(unix)]
pub async fn forward_signals(signals: broadcast::Sender<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    signals.send(Signal::Shutdown).ok();

    Ok(())
}

//! The dispatch service and its lifecycle

use std::{fmt, sync::Arc, time::Duration};

use herald_common::internal;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::DispatchConfig,
    error::{ConfigError, DispatchError},
    listener::{FlushReport, Listener},
    message::{CorrelationId, ErrorRecord},
    notifier::Notifier,
    queue::{AdmissionQueue, ErrorChannel, error_queue},
    rate_limiter::{RateLimitStats, RateLimiter},
    retrier::Retrier,
    sender::Dispatcher,
    transport::{Transport, build_client},
};

/// Lifecycle of a [`Herald`]. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    /// Constructed, nothing is being sent yet
    Idle,
    /// The listen loop is admitting messages
    Listening,
    /// Draining; new notifications are refused
    Terminating,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Terminating => "terminating",
        })
    }
}

/// Queues, rate limits and sends notifications to a single HTTP endpoint
///
/// ```rust,ignore
/// let herald = Herald::new("http://localhost:9090/api/notifications", DispatchConfig::default())?;
/// herald.start_listening()?;
///
/// let id = herald.notify(["hello", "world"])?;
///
/// let errors = herald.error_channel();
/// while let Some(record) = errors.recv().await {
///     if record.retry_count < 2 {
///         herald.retry_record(record).await?;
///     }
/// }
/// ```
pub struct Herald {
    config: DispatchConfig,
    url: Url,
    state: Mutex<Lifecycle>,
    queue: AdmissionQueue,
    errors: ErrorChannel,
    listener: Arc<Listener>,
    notifier: Notifier,
    retrier: Retrier,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl fmt::Debug for Herald {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Herald")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Herald {
    /// Build a service sending to `url` with the default reqwest transport
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a construction error if the URL is empty or malformed, the
    /// configuration is unusable, or no runtime is available.
    pub fn new(url: &str, config: DispatchConfig) -> Result<Self, DispatchError> {
        Self::builder(url).config(config).build()
    }

    /// Start building a service sending to `url`
    pub fn builder(url: impl Into<String>) -> HeraldBuilder {
        HeraldBuilder {
            url: url.into(),
            config: DispatchConfig::default(),
            transport: None,
            runtime: None,
        }
    }

    /// Queue a batch of notifications
    ///
    /// Returns the batch's correlation id before the messages are
    /// guaranteed to be queued; use it to match later [`ErrorRecord`]s.
    /// Empty strings are skipped, and an empty batch returns the empty id.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ServiceTerminating`] once [`terminate`](Self::terminate)
    /// has been called, or [`DispatchError::IdGeneration`] if no id could be made.
    pub fn notify<I, S>(&self, messages: I) -> Result<CorrelationId, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let messages = messages.into_iter().map(Into::into).collect();

        // Held while the push task is spawned, so terminate sees every
        // accepted batch in the notifier's tracker
        let state = self.state.lock();
        if *state == Lifecycle::Terminating {
            return Err(DispatchError::ServiceTerminating);
        }

        self.notifier.notify(messages)
    }

    /// Queue a previously failed message again
    ///
    /// Accepted in every state, including while terminating, so a retry
    /// decision is never silently discarded. The queued message carries
    /// `retry_count + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyContent`] if `content` is empty.
    pub async fn retry(
        &self,
        content: impl Into<String>,
        correlation_id: impl Into<CorrelationId>,
        index: usize,
        retry_count: u32,
    ) -> Result<(), DispatchError> {
        if self.state() == Lifecycle::Terminating {
            tracing::warn!(
                index,
                retry_count,
                "Retry accepted while terminating, it may not be sent before exit"
            );
        }

        self.retrier
            .retry(content.into(), correlation_id.into(), index, retry_count)
            .await
    }

    /// Queue the message described by `record` again
    ///
    /// # Errors
    ///
    /// See [`retry`](Self::retry).
    pub async fn retry_record(&self, record: ErrorRecord) -> Result<(), DispatchError> {
        self.retry(
            record.content,
            record.correlation_id,
            record.index,
            record.retry_count,
        )
        .await
    }

    /// Start the rate-limited listen loop on the runtime
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidState`] unless the service is idle.
    pub fn start_listening(&self) -> Result<(), DispatchError> {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Idle {
                return Err(DispatchError::InvalidState {
                    from: *state,
                    to: Lifecycle::Listening,
                });
            }
            *state = Lifecycle::Listening;
        }

        internal!(
            level = INFO,
            "Listening for notifications to {} at {}/s (burst {}, queue capacity {})",
            self.url,
            self.config.messages_per_second,
            self.config.burst_limit,
            self.queue.capacity()
        );

        let listener = Arc::clone(&self.listener);
        let shutdown = self.shutdown.clone();
        self.runtime
            .spawn(async move { listener.listen(shutdown).await });

        Ok(())
    }

    /// Stop accepting notifications and drain the admission queue
    ///
    /// The listen loop is told to stop, then queued messages are sent one
    /// after another, bypassing the rate limiter, until the queue is empty
    /// or `timeout` has elapsed. Batches accepted by [`notify`](Self::notify)
    /// but not yet queued are waited for and flushed too. Anything still
    /// unsent at the deadline is counted in [`FlushReport::remaining`]. The
    /// returned handle resolves once flushing is over; sends started earlier
    /// by the listen loop may still be running.
    pub fn terminate(&self, timeout: Duration) -> JoinHandle<FlushReport> {
        let previous = {
            let mut state = self.state.lock();
            self.notifier.pushes().close();
            std::mem::replace(&mut *state, Lifecycle::Terminating)
        };
        internal!(
            level = INFO,
            "Terminating from {} with {} messages pending",
            previous,
            self.pending()
        );

        self.shutdown.cancel();

        let listener = Arc::clone(&self.listener);
        let pushes = self.notifier.pushes().clone();
        self.runtime
            .spawn(async move { listener.flush(timeout, &pushes).await })
    }

    /// A read handle onto the failures reported by the dispatcher
    ///
    /// Callers should drain it continuously; once it is full, sending stalls.
    pub fn error_channel(&self) -> ErrorChannel {
        self.errors.clone()
    }

    /// Number of messages waiting in the admission queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of sends started by the listen loop that have not finished
    pub fn in_flight(&self) -> usize {
        self.listener.in_flight()
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.lock()
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.listener.limiter_stats()
    }
}

/// Builder for [`Herald`]
#[must_use]
pub struct HeraldBuilder {
    url: String,
    config: DispatchConfig,
    transport: Option<Arc<dyn Transport>>,
    runtime: Option<Handle>,
}

impl HeraldBuilder {
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `transport` instead of a reqwest client built from the configuration
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Spawn background work on `runtime` instead of the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the final `Herald`
    ///
    /// The URL is checked before anything else is created.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError::Configuration`] describing the first problem found.
    pub fn build(self) -> Result<Herald, DispatchError> {
        let url = validate_url(&self.url)?;
        let config = self.config.normalised()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(build_client(&config.transport)?),
        };

        internal!(level = DEBUG, "Dispatcher configuration: {:?}", config);

        let queue = AdmissionQueue::new(config.queue_capacity);
        let (error_tx, errors) = error_queue(config.error_queue_capacity);

        let dispatcher = Dispatcher::new(url.clone(), transport, error_tx);
        let limiter = RateLimiter::new(config.messages_per_second, config.burst_limit);
        let listener = Listener::new(queue.clone(), limiter, dispatcher, config.max_in_flight);

        Ok(Herald {
            notifier: Notifier::new(queue.clone(), runtime.clone()),
            retrier: Retrier::new(queue.clone()),
            listener: Arc::new(listener),
            state: Mutex::new(Lifecycle::Idle),
            shutdown: CancellationToken::new(),
            config,
            url,
            queue,
            errors,
            runtime,
        })
    }
}

/// Accept only absolute http(s) URLs
fn validate_url(url: &str) -> Result<Url, ConfigError> {
    if url.is_empty() {
        return Err(ConfigError::EmptyUrl);
    }

    let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidUrl(format!("{url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl(format!(
            "{url}: expected an absolute http or https URL"
        )));
    }

    Ok(parsed)
}

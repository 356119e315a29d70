//! Dispatcher configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const fn default_messages_per_second() -> u32 {
    1000
}

const fn default_burst_limit() -> u32 {
    1000
}

const fn default_queue_capacity() -> usize {
    1000
}

const fn default_error_queue_capacity() -> usize {
    500
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("herald/{}", env!("CARGO_PKG_VERSION"))
}

/// Configuration for the dispatcher
///
/// Every field may be omitted when deserialising; missing fields take the
/// documented default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Sustained number of messages admitted per second
    ///
    /// Default: 1000
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,

    /// Maximum number of tokens that may accumulate in the rate limiter,
    /// i.e. how many messages may be admitted back to back after idling
    ///
    /// Default: 1000
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,

    /// Capacity of the admission queue. Producers wait when it is full.
    ///
    /// Taken as given: zero is not replaced by the default but rejected by
    /// [`normalised`](Self::normalised) with [`ConfigError::ZeroCapacity`].
    ///
    /// Default: 1000
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the error queue. Senders wait when it is full.
    ///
    /// Zero is rejected the same way as for `queue_capacity`.
    ///
    /// Default: 500
    #[serde(default = "default_error_queue_capacity")]
    pub error_queue_capacity: usize,

    /// Ceiling on concurrently running sends
    ///
    /// Only the admission rate is bounded when this is `None`: every
    /// admitted message is sent immediately, however many are still
    /// waiting on the endpoint.
    ///
    /// Default: None (unbounded)
    #[serde(default)]
    pub max_in_flight: Option<usize>,

    /// Settings for the default HTTP transport
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Settings for the reqwest-backed transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Per-request timeout in seconds
    ///
    /// Default: 30
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// `User-Agent` header sent with each request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            messages_per_second: default_messages_per_second(),
            burst_limit: default_burst_limit(),
            queue_capacity: default_queue_capacity(),
            error_queue_capacity: default_error_queue_capacity(),
            max_in_flight: None,
            transport: TransportConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl DispatchConfig {
    /// Validate the configuration, replacing unusable rate settings by
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroCapacity`] if either queue capacity is zero.
    pub fn normalised(mut self) -> Result<Self, ConfigError> {
        if self.messages_per_second == 0 {
            tracing::warn!(
                default = default_messages_per_second(),
                "messages_per_second must be positive, using the default"
            );
            self.messages_per_second = default_messages_per_second();
        }

        if self.burst_limit == 0 {
            tracing::warn!(
                default = default_burst_limit(),
                "burst_limit must be positive, using the default"
            );
            self.burst_limit = default_burst_limit();
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue_capacity"));
        }

        if self.error_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("error_queue_capacity"));
        }

        if self.max_in_flight == Some(0) {
            tracing::warn!("max_in_flight of 0 would never send anything, leaving it unbounded");
            self.max_in_flight = None;
        }

        if self.transport.timeout_secs == 0 {
            self.transport.timeout_secs = default_timeout_secs();
        }

        Ok(self)
    }
}

//! Typed error handling for dispatch operations.
//!
//! Failures fall into four groups:
//! - Construction errors (bad URL, bad configuration, missing runtime)
//! - Id-generation errors, fatal to a single `notify` call
//! - Delivery failures, never returned to the caller but converted into
//!   [`ErrorRecord`](crate::ErrorRecord)s on the error channel
//! - Lifecycle errors, such as notifying while terminating

use reqwest::StatusCode;
use thiserror::Error;

use crate::Lifecycle;

/// Top-level error returned by the synchronous dispatch API.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The service could not be constructed.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// No correlation id could be produced for a batch.
    #[error("Unable to create a correlation id: {0}")]
    IdGeneration(String),

    /// The service is draining and refuses new notifications.
    #[error("The service is terminating, it does not accept new notifications")]
    ServiceTerminating,

    /// A lifecycle transition was requested from the wrong state.
    #[error("Cannot move from {from} to {to}")]
    InvalidState { from: Lifecycle, to: Lifecycle },

    /// Messages must carry some content.
    #[error("Message content can not be empty")]
    EmptyContent,

    /// The admission queue no longer has a consumer.
    #[error("Admission queue is closed")]
    QueueClosed,
}

/// Errors raised while building the service.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("empty URL")]
    EmptyUrl,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Queue capacities are taken as given, so zero cannot be defaulted away.
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),

    #[error("no tokio runtime available to drive the dispatcher")]
    NoRuntime,

    #[error("unable to build the HTTP client: {0}")]
    Transport(String),
}

/// Failures reported by a [`Transport`](crate::Transport) before any
/// response status is available.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Request(String),
}

/// Why a single send attempt did not succeed.
///
/// The `Display` output is what ends up in `ErrorRecord::description`.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("unable to send the request: {0}")]
    Transport(#[from] TransportError),

    #[error("unexpected HTTP status: {0}")]
    UnexpectedStatus(StatusCode),
}

impl DispatchError {
    /// Returns `true` if the error happened while constructing the service.
    #[must_use]
    pub const fn is_construction(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns `true` if the error is a rejection caused by the lifecycle state.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::ServiceTerminating | Self::InvalidState { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::Connection(error.to_string())
        } else {
            Self::Request(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_dispatch_error_is_construction() {
        let error = DispatchError::from(ConfigError::EmptyUrl);
        assert!(error.is_construction());
        assert!(!error.is_lifecycle());
    }

    #[test]
    fn test_dispatch_error_is_lifecycle() {
        assert!(DispatchError::ServiceTerminating.is_lifecycle());
        assert!(
            DispatchError::InvalidState {
                from: Lifecycle::Terminating,
                to: Lifecycle::Listening,
            }
            .is_lifecycle()
        );
        assert!(!DispatchError::EmptyContent.is_lifecycle());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DispatchError::from(ConfigError::EmptyUrl).to_string(),
            "Configuration error: empty URL"
        );
        assert_eq!(
            DispatchError::InvalidState {
                from: Lifecycle::Listening,
                to: Lifecycle::Listening,
            }
            .to_string(),
            "Cannot move from listening to listening"
        );
        assert_eq!(
            ConfigError::ZeroCapacity("queue_capacity").to_string(),
            "queue_capacity must be greater than zero"
        );
    }

    #[test]
    fn test_delivery_failure_display() {
        let failure = DeliveryFailure::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            failure.to_string(),
            "unexpected HTTP status: 500 Internal Server Error"
        );

        let failure = DeliveryFailure::from(TransportError::Connection(
            "connection refused".to_string(),
        ));
        assert_eq!(
            failure.to_string(),
            "unable to send the request: connection failed: connection refused"
        );
    }
}

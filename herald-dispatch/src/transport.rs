//! Transport capability used by the dispatcher
//!
//! The dispatcher only needs "perform this request, give me a status or an
//! error". TLS, pooling and name resolution belong to the implementation,
//! which by default is a [`reqwest::Client`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};

use crate::{
    config::TransportConfig,
    error::{ConfigError, TransportError},
};

/// A single outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    /// Raw message text
    pub body: String,
}

/// What the dispatcher needs to know about a response
///
/// Implementations must release the response body before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: StatusCode,
}

/// Performs requests on behalf of the dispatcher
///
/// Invoked concurrently from many tasks, so implementations must not rely on
/// exclusive access.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request and report its status
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if no response was received.
    async fn perform(&self, request: TransportRequest)
    -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn perform(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .request(request.method, request.url)
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        // Dropping the response closes the body and returns the connection
        drop(response);

        Ok(TransportResponse { status })
    }
}

/// Build the default HTTP client
///
/// # Errors
///
/// Returns [`ConfigError::Transport`] if reqwest rejects the settings.
pub fn build_client(config: &TransportConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| ConfigError::Transport(e.to_string()))
}

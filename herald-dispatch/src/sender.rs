//! Sending a single message and classifying the outcome

use std::sync::Arc;

use herald_common::outgoing;
use reqwest::{Method, StatusCode, Url};
use tokio::sync::mpsc;

use crate::{
    error::DeliveryFailure,
    message::{ErrorRecord, Message},
    transport::{Transport, TransportRequest},
};

/// Result of one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The endpoint accepted the message
    Delivered(StatusCode),
    /// The attempt failed and an [`ErrorRecord`] was queued
    Reported,
}

/// Statuses the endpoint may answer with for a message to count as sent
const ACCEPTED: [StatusCode; 2] = [StatusCode::OK, StatusCode::CREATED];

/// Performs one transport call per message
///
/// Holds no mutable state; clones share the transport and the error queue,
/// so any number of sends may run at once.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    url: Url,
    transport: Arc<dyn Transport>,
    errors: mpsc::Sender<ErrorRecord>,
}

impl Dispatcher {
    pub(crate) fn new(
        url: Url,
        transport: Arc<dyn Transport>,
        errors: mpsc::Sender<ErrorRecord>,
    ) -> Self {
        Self {
            url,
            transport,
            errors,
        }
    }

    /// POST the message content to the destination
    ///
    /// Failures are pushed onto the error queue, waiting for space if it is
    /// full; they are never dropped while a reader exists.
    pub(crate) async fn send(&self, message: Message) -> Delivery {
        let request = TransportRequest {
            method: Method::POST,
            url: self.url.clone(),
            body: message.content().to_string(),
        };

        outgoing!(
            "POST {} GUID={} index={}",
            self.url,
            message.correlation_id(),
            message.index()
        );

        let failure = match self.transport.perform(request).await {
            Ok(response) if ACCEPTED.contains(&response.status) => {
                tracing::debug!(
                    status = %response.status,
                    correlation_id = %message.correlation_id(),
                    index = message.index(),
                    "Message sent"
                );
                return Delivery::Delivered(response.status);
            }
            Ok(response) => DeliveryFailure::UnexpectedStatus(response.status),
            Err(e) => DeliveryFailure::Transport(e),
        };

        self.report(message, &failure).await;
        Delivery::Reported
    }

    async fn report(&self, message: Message, failure: &DeliveryFailure) {
        tracing::warn!(
            correlation_id = %message.correlation_id(),
            index = message.index(),
            retry_count = message.retry_count(),
            error = %failure,
            "Message delivery failed"
        );

        let record = ErrorRecord::from_failure(message, failure.to_string());
        if let Err(e) = self.errors.send(record).await {
            tracing::error!(
                correlation_id = %e.0.correlation_id,
                index = e.0.index,
                "Error channel closed, failure record lost"
            );
        }
    }
}

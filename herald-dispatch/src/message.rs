//! Records passed between the dispatch components

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Opaque identifier shared by every message of one `notify` batch
///
/// Ids produced by the service are ULIDs, but any string supplied by a
/// caller (for instance when retrying) is accepted as is. The default value
/// is the empty id returned for empty batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ulid::Ulid> for CorrelationId {
    fn from(id: ulid::Ulid) -> Self {
        Self::new(id.to_string())
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CorrelationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// One unit of work waiting in, or claimed from, the admission queue
///
/// Messages are never modified once built; a retry produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    content: String,
    correlation_id: CorrelationId,
    index: usize,
    retry_count: u32,
}

impl Message {
    /// Build a message, refusing empty content
    pub(crate) fn new(
        content: String,
        correlation_id: CorrelationId,
        index: usize,
        retry_count: u32,
    ) -> Option<Self> {
        if content.is_empty() {
            return None;
        }

        Some(Self {
            content,
            correlation_id,
            index,
            retry_count,
        })
    }

    /// Text sent as the request body
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Position within the originating batch, for diagnostics only
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Number of times this content has been re-enqueued
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub(crate) fn into_content(self) -> String {
        self.content
    }
}

/// Failure report for a single message, read by the caller from the
/// error channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub correlation_id: CorrelationId,
    pub index: usize,
    /// The content that could not be delivered
    pub content: String,
    /// Human readable cause, e.g. `unexpected HTTP status: 500 Internal Server Error`
    pub description: String,
    /// Retry count of the message that failed
    pub retry_count: u32,
}

impl ErrorRecord {
    pub(crate) fn from_failure(message: Message, description: String) -> Self {
        let correlation_id = message.correlation_id.clone();
        let index = message.index;
        let retry_count = message.retry_count;

        Self {
            correlation_id,
            index,
            content: message.into_content(),
            description,
            retry_count,
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] for message: {{ GUID: \"{}\", Index: {}, Retries: {}, Content: \"{}\" }}",
            self.description, self.correlation_id, self.index, self.retry_count, self.content
        )
    }
}

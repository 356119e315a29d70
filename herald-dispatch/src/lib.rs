//! Rate-limited dispatch of notifications to an HTTP endpoint
//!
//! This crate provides functionality to:
//! - Accept batches of notifications tagged with a correlation id
//! - Admit queued messages through a token bucket and POST them concurrently
//! - Report every failed attempt on an error channel, for the caller to retry
//! - Flush whatever is still queued within a deadline on shutdown

mod config;
mod error;
mod listener;
mod message;
mod notifier;
mod queue;
mod rate_limiter;
mod retrier;
mod sender;
mod service;
mod transport;

// Re-export configuration types
pub use config::{DispatchConfig, TransportConfig};
// Re-export error types
pub use error::{ConfigError, DeliveryFailure, DispatchError, TransportError};
// Re-export core types
pub use listener::FlushReport;
pub use message::{CorrelationId, ErrorRecord, Message};
pub use queue::ErrorChannel;
pub use rate_limiter::{RateLimitStats, RateLimiter};
pub use service::{Herald, HeraldBuilder, Lifecycle};
pub use transport::{Transport, TransportRequest, TransportResponse, build_client};

pub mod logging;

pub use tracing;

/// Process-wide lifecycle signal broadcast to long running tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting new work and drain what is already queued
    Shutdown,
    /// Draining has finished; tasks may exit
    Finalised,
}

//! Command line relay for the herald dispatcher
//!
//! Reads notifications from standard input, one per line, and forwards them
//! in batches to an HTTP endpoint through [`herald_dispatch::Herald`].

pub mod cli;
pub mod relay;

pub use cli::Args;
pub use relay::{Relay, RelayOptions};

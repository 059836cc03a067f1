//! tcprelay Library
//!
//! Transparent TCP relay: listens on one address and, for every client,
//! opens a connection to a fixed target and shuttles bytes both ways.
//! All relaying happens on a single readiness-driven event loop.

pub mod config;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use relay::{RelayEngine, RelayHandle};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;

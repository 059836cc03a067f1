//! Data Relay Module
//!
//! Readiness-driven, single-threaded relay between accepted clients and a
//! fixed upstream target.

pub mod dial;
pub mod engine;
pub mod event;
pub mod handle;
pub mod listener;
pub mod session;
pub mod stats;
pub mod table;

pub use engine::RelayEngine;
pub use handle::RelayHandle;
pub use session::RelaySession;
pub use stats::{RelayStats, StatsSnapshot};

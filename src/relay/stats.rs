//! Engine-wide relay counters.
//!
//! The engine is the only writer; other threads (the handle owner, tests)
//! read snapshots without touching any engine state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::RelaySession;

/// Counters updated by the engine thread
#[derive(Debug, Default)]
pub struct RelayStats {
    active_pairs: AtomicUsize,
    total_pairs: AtomicU64,
    dial_failures: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_pairs: usize,
    pub total_pairs: u64,
    pub dial_failures: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pair_opened(&self) {
        self.active_pairs.fetch_add(1, Ordering::Relaxed);
        self.total_pairs.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished session into the totals. The byte totals are
    /// published before the pair stops counting as active.
    pub fn record_pair_closed(&self, session: &RelaySession) {
        self.bytes_up.fetch_add(session.bytes_up(), Ordering::Relaxed);
        self.bytes_down.fetch_add(session.bytes_down(), Ordering::Relaxed);
        self.active_pairs.fetch_sub(1, Ordering::Release);
    }

    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_pairs(&self) -> usize {
        self.active_pairs.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_pairs: self.active_pairs.load(Ordering::Acquire),
            total_pairs: self.total_pairs.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the synchronizer coordinator.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::processor::EventOutcome;

/// Synchronizer lifecycle state.
///
/// Use [`super::DirectorySynchronizer::state()`] to check the current state or
/// [`super::DirectorySynchronizer::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not listening. Initial and terminal state.
    Stopped,
    /// Opening the change feed
    Starting,
    /// Processing loop is consuming events
    Running,
    /// Cancelling the loop and closing the feed
    Stopping,
}

impl SyncState {
    /// Numeric form for the state gauge.
    pub fn code(&self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Per-event counters, shared with the processing loop.
#[derive(Debug, Default)]
pub struct SyncStats {
    received: AtomicU64,
    applied: AtomicU64,
    skipped: AtomicU64,
    ignored: AtomicU64,
    dropped: AtomicU64,
    last_drop: Mutex<Option<String>>,
}

impl SyncStats {
    pub(crate) fn record(&self, outcome: &EventOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match outcome {
            EventOutcome::Applied(_) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            EventOutcome::Skipped(..) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            EventOutcome::Ignored(_) | EventOutcome::Invalidated => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
            }
            EventOutcome::Dropped(err) => {
                *self.last_drop.lock() = Some(err.to_string());
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            last_drop: self.last_drop.lock().clone(),
        }
    }
}

/// Point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub applied: u64,
    /// Projected as a no-op (not cached, record gone, ...)
    pub skipped: u64,
    pub ignored: u64,
    /// Lost to a decode, cache or store failure
    pub dropped: u64,
    pub last_drop: Option<String>,
}

impl StatsSnapshot {
    /// Events that reached a final outcome.
    pub fn processed(&self) -> u64 {
        self.applied + self.skipped + self.ignored + self.dropped
    }
}

//! # Connection Counters
//!
//! Purpose: Count what flows through one multiplexed connection so callers
//! can see how many requests were queued, answered, or dropped.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Zero-Cost Access**: Snapshots are plain structs without heap work.
//!
//! ## Notes
//! - `Ordering::Relaxed` is enough: a caller that received a reply through
//!   its one-shot slot already happens-after every counter update made
//!   before that reply was delivered.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of connection counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Requests appended to the pending queue.
    pub submitted: u64,
    /// Requests matched to a reply (including discarded ones).
    pub completed: u64,
    /// Completed requests whose reply was dropped (fire-and-forget).
    pub discarded: u64,
    /// Completed requests answered with an error reply.
    pub reply_errors: u64,
    /// Requests failed with `ConnectionLost`.
    pub lost: u64,
    /// Requests still waiting for a reply.
    pub in_flight: u64,
}

/// Thread-safe counters owned by a connection.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    discarded: AtomicU64,
    reply_errors: AtomicU64,
    lost: AtomicU64,
}

impl Counters {
    pub(crate) fn record_submitted(&self, count: usize) {
        self.submitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records one reply matched to its request.
    pub(crate) fn record_completed(&self, discarded: bool, reply_error: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if discarded {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
        if reply_error {
            self.reply_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_lost(&self, count: usize) {
        self.lost.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot; `in_flight` comes from the pending queue.
    pub(crate) fn snapshot(&self, in_flight: usize) -> ConnectionStats {
        ConnectionStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            reply_errors: self.reply_errors.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            in_flight: in_flight as u64,
        }
    }
}

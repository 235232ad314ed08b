//! Scan statistics with atomic counters.
//!
//! This module provides [`ScanStats`] for tracking pipeline progress and
//! [`StatsSnapshot`] for point-in-time views.
//!
//! # Thread Safety
//!
//! Counters are [`AtomicU64`]. Increments use
//! [`Relaxed`](std::sync::atomic::Ordering::Relaxed) ordering; a snapshot
//! may straddle an update but never reports a counter that went backwards.
//!
//! # Examples
//!
//! ```
//! use ps_core::ScanStatus;
//! use ps_scanner::ScanStats;
//!
//! let stats = ScanStats::new();
//! stats.record_accepted();
//! stats.record_dequeued();
//! stats.record_terminal(ScanStatus::Completed);
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.completed, 1);
//! assert!((snapshot.progress() - 1.0).abs() < f64::EPSILON);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use ps_core::ScanStatus;
use serde::{Deserialize, Serialize};

/// Atomic counters for the scan pipeline.
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Results accepted into the pipeline.
    total: AtomicU64,
    /// Results waiting in the queue.
    queued: AtomicU64,
    /// Results in any terminal status.
    completed: AtomicU64,
    /// Results that ended in `Error`.
    errors: AtomicU64,
    /// Results that ended in `Cancelled`.
    cancelled: AtomicU64,
}

impl ScanStats {
    /// Creates a new [`ScanStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a newly accepted and queued result.
    #[inline]
    pub fn record_accepted(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Undoes [`record_accepted`](Self::record_accepted) for a result that
    /// never made it into the queue.
    #[inline]
    pub fn record_rejected(&self) {
        let _ = self
            .total
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.record_dequeued();
    }

    /// Counts a result leaving the queue, whether to run or to be cancelled.
    #[inline]
    pub fn record_dequeued(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Counts a terminal transition. Non-terminal statuses are ignored.
    pub fn record_terminal(&self, status: ScanStatus) {
        match status {
            ScanStatus::Completed => {}
            ScanStatus::Error => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            ScanStatus::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            ScanStatus::Pending | ScanStatus::Scanning => return,
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.queued.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.cancelled.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of scan statistics.
///
/// # Examples
///
/// ```
/// use ps_scanner::StatsSnapshot;
///
/// let snap = StatsSnapshot {
///     total: 4,
///     queued: 1,
///     completed: 2,
///     errors: 1,
///     cancelled: 0,
/// };
/// assert!((snap.progress() - 0.5).abs() < f64::EPSILON);
/// assert_eq!(snap.succeeded(), 1);
/// assert_eq!(snap.in_flight(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Results accepted into the pipeline.
    pub total: u64,
    /// Results waiting in the queue.
    pub queued: u64,
    /// Results in any terminal status.
    pub completed: u64,
    /// Results that ended in `Error`.
    pub errors: u64,
    /// Results that ended in `Cancelled`.
    pub cancelled: u64,
}

impl StatsSnapshot {
    /// Returns `completed / total`, or `0.0` when nothing was accepted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Acceptable for progress display
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }

    /// Returns the number of results that completed with analysis text.
    #[inline]
    #[must_use]
    pub const fn succeeded(&self) -> u64 {
        self.completed
            .saturating_sub(self.errors)
            .saturating_sub(self.cancelled)
    }

    /// Returns the number of results currently being analysed.
    #[inline]
    #[must_use]
    pub const fn in_flight(&self) -> u64 {
        self.total
            .saturating_sub(self.completed)
            .saturating_sub(self.queued)
    }

    /// Returns `true` once every accepted result is terminal.
    #[inline]
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.completed >= self.total
    }
}

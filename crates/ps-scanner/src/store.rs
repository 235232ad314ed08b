//! Thread-safe store of scan results.
//!
//! # Safety Pattern
//!
//! The store never hands out references into its storage. Reads return
//! clones and writes go through closures that run under the write lock,
//! so callers cannot hold a lock across a callback or an `.await`.
//!
//! The pipeline counters live here too. Every insert, transition and clear
//! updates them under the same write lock as the results, so a clear can
//! never interleave with a transition and leave counts from the previous
//! session behind.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use ps_core::{FxHashMap, RiskLevel, ScanId, ScanResult, ScanStatus, TransitionError};

use crate::stats::ScanStats;

#[derive(Debug, Default)]
struct Inner {
    /// Results in acceptance order.
    results: Vec<ScanResult>,
    /// Position of each id in `results`.
    index: FxHashMap<ScanId, usize>,
}

/// Results in acceptance order, indexed by id.
///
/// Ids come from a counter that is never reset, so an id is never reused
/// even across [`clear`](Self::clear).
///
/// # Examples
///
/// ```
/// use ps_core::{Exchange, HttpRequest, ScanResult};
/// use ps_scanner::ResultStore;
///
/// let store = ResultStore::new();
/// let id = store.next_id();
/// let exchange = Exchange::new(HttpRequest::new("GET", "https://h/a"), None);
/// store.insert(ScanResult::new(id, &exchange, 60));
///
/// let updated = store.update(id, ScanResult::mark_scanning).unwrap().unwrap();
/// assert!(!updated.is_terminal());
/// assert_eq!(store.get(id).unwrap().status(), updated.status());
/// ```
#[derive(Debug)]
pub struct ResultStore {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    stats: ScanStats,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    /// Creates an empty store whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
            stats: ScanStats::new(),
        }
    }

    /// Returns the counters kept in step with the stored results.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Allocates the next result id.
    pub fn next_id(&self) -> ScanId {
        ScanId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends a result and counts it as accepted and queued.
    pub fn insert(&self, result: ScanResult) {
        let mut inner = self.inner.write();
        let pos = inner.results.len();
        inner.index.insert(result.id(), pos);
        inner.results.push(result);
        self.stats.record_accepted();
    }

    /// Removes a result, used when an accepted result could not be queued.
    ///
    /// The acceptance is uncounted along with it.
    pub fn remove(&self, id: ScanId) -> Option<ScanResult> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let pos = inner.index.remove(&id)?;
        let removed = inner.results.remove(pos);
        for (i, result) in inner.results.iter().enumerate().skip(pos) {
            inner.index.insert(result.id(), i);
        }
        self.stats.record_rejected();
        Some(removed)
    }

    /// Applies a transition to one result and returns the updated clone.
    ///
    /// Returns `None` if the id is unknown, for example after a clear.
    pub fn update<F>(
        &self,
        id: ScanId,
        transition: F,
    ) -> Option<Result<ScanResult, TransitionError>>
    where
        F: FnOnce(&mut ScanResult) -> Result<(), TransitionError>,
    {
        let mut inner = self.inner.write();
        let pos = *inner.index.get(&id)?;
        let result = inner.results.get_mut(pos)?;
        let from = result.status();
        Some(transition(result).map(|()| {
            self.count_transition(from, result.status());
            result.clone()
        }))
    }

    fn count_transition(&self, from: ScanStatus, to: ScanStatus) {
        if from == ScanStatus::Pending && to != ScanStatus::Pending {
            self.stats.record_dequeued();
        }
        if !from.is_terminal() {
            self.stats.record_terminal(to);
        }
    }

    /// Returns a clone of one result.
    #[must_use]
    pub fn get(&self, id: ScanId) -> Option<ScanResult> {
        let inner = self.inner.read();
        let pos = *inner.index.get(&id)?;
        inner.results.get(pos).cloned()
    }

    /// Returns a fresh copy of all results in acceptance order.
    #[must_use]
    pub fn all(&self) -> Vec<ScanResult> {
        self.inner.read().results.clone()
    }

    /// Returns the number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().results.len()
    }

    /// Returns `true` if the store holds no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().results.is_empty()
    }

    /// Counts results per risk level, with every level present.
    #[must_use]
    pub fn count_by_risk(&self) -> BTreeMap<RiskLevel, usize> {
        let mut counts: BTreeMap<RiskLevel, usize> =
            RiskLevel::ALL.iter().map(|level| (*level, 0)).collect();
        for result in &self.inner.read().results {
            *counts.entry(result.risk_level()).or_default() += 1;
        }
        counts
    }

    /// Cancels every result still `Pending` and returns the updated clones.
    pub fn cancel_pending(&self) -> Vec<ScanResult> {
        let mut inner = self.inner.write();
        let cancelled: Vec<ScanResult> = inner
            .results
            .iter_mut()
            .filter(|r| r.status() == ScanStatus::Pending)
            .filter_map(|r| r.mark_cancelled().ok().map(|()| r.clone()))
            .collect();
        for _ in &cancelled {
            self.count_transition(ScanStatus::Pending, ScanStatus::Cancelled);
        }
        cancelled
    }

    /// Drops every result and zeroes the counters. The id counter keeps
    /// counting.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.results.clear();
        inner.index.clear();
        self.stats.reset();
    }
}

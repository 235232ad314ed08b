//! Session-scoped suppression of repeat scans.

use parking_lot::Mutex;
use ps_core::FxHashSet;

/// Records dedup keys seen in the current session.
///
/// Keys survive stop/start and are forgotten only by [`clear`](Self::clear).
///
/// # Examples
///
/// ```
/// use ps_scanner::Deduplicator;
///
/// let dedup = Deduplicator::new();
/// assert!(dedup.check_and_insert("GET|h|https://h/a"));
/// assert!(!dedup.check_and_insert("GET|h|https://h/a"));
/// dedup.clear();
/// assert!(dedup.check_and_insert("GET|h|https://h/a"));
/// ```
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<FxHashSet<String>>,
}

impl Deduplicator {
    /// Creates an empty deduplicator.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key`. Returns `true` if it was not seen before.
    pub fn check_and_insert(&self, key: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_owned())
    }

    /// Forgets `key`, used when an accepted candidate could not be queued.
    pub fn remove(&self, key: &str) {
        self.seen.lock().remove(key);
    }

    /// Returns `true` if `key` was recorded.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.seen.lock().contains(key)
    }

    /// Returns the number of recorded keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns `true` if no keys are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// Forgets every key.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Tracks how many readers are pinned to each open version, so
/// `oldest_version_to_keep` can advance without stranding an in-flight
/// reader. Mirrors the spec's TxCounter `(version, refcount)` queue.
#[derive(Default)]
pub struct VersionTracker {
    inner: Mutex<VersionTrackerInner>,
}

#[derive(Default)]
struct VersionTrackerInner {
    refcounts: BTreeMap<u64, i64>,
    current_version: u64,
    oldest_version_to_keep: u64,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_version(&self) -> u64 {
        self.inner.lock().current_version
    }

    pub fn set_current_version(&self, version: u64) {
        let mut inner = self.inner.lock();
        inner.current_version = version;
    }

    /// Pins `version` so it can't be reclaimed; call
    /// [`Self::deregister_version_usage`] exactly once per call to release it.
    pub fn register_version_usage(&self, version: u64) {
        let mut inner = self.inner.lock();
        *inner.refcounts.entry(version).or_insert(0) += 1;
    }

    pub fn deregister_version_usage(&self, version: u64) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.refcounts.get_mut(&version) {
            *count -= 1;
            if *count <= 0 {
                inner.refcounts.remove(&version);
            }
        }
        Self::recompute_oldest(&mut inner);
    }

    /// Monotone: the oldest version still visible to some registered reader
    /// (or `current_version` if nobody is registered). Callers must never
    /// observe this value decrease.
    pub fn oldest_version_to_keep(&self) -> u64 {
        self.inner.lock().oldest_version_to_keep
    }

    fn recompute_oldest(inner: &mut VersionTrackerInner) {
        let floor = inner
            .refcounts
            .keys()
            .next()
            .copied()
            .unwrap_or(inner.current_version);
        inner.oldest_version_to_keep = inner.oldest_version_to_keep.max(floor.min(inner.current_version));
        // recompute to the true minimum rather than only ever increasing
        // floor, since a new reader may register below the previous floor.
        inner.oldest_version_to_keep = inner
            .refcounts
            .keys()
            .next()
            .copied()
            .unwrap_or(inner.current_version);
    }

    pub fn advance_oldest_version_to_keep(&self) {
        let mut inner = self.inner.lock();
        Self::recompute_oldest(&mut inner);
    }

    pub fn is_drained(&self) -> bool {
        self.inner.lock().refcounts.is_empty()
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::watcher::CacheWatcher;

/// Second-granularity schedule of upcoming per-watcher bookmarks.
///
/// Watchers land in the bucket covering their next bookmark time; the
/// dispatcher's tick pops every bucket at or before "now" and merges the
/// popped watchers into the next bookmark dispatch. Precision within one
/// second is all the bookmark contract needs.
pub(crate) struct BookmarkTimeBuckets {
    origin: Instant,
    frequency: Duration,
    inner: Mutex<BucketState>,
}

struct BucketState {
    buckets: HashMap<u64, Vec<Arc<CacheWatcher>>>,
    start_bucket: u64,
}

impl BookmarkTimeBuckets {
    pub(crate) fn new(frequency: Duration) -> Self {
        Self {
            origin: Instant::now(),
            frequency,
            inner: Mutex::new(BucketState {
                buckets: HashMap::new(),
                start_bucket: 0,
            }),
        }
    }

    fn bucket_id(
        &self,
        at: Instant,
    ) -> u64 {
        at.saturating_duration_since(self.origin).as_secs()
    }

    /// Schedule the watcher's next bookmark. Returns false for watchers
    /// that never take bookmarks.
    pub(crate) fn add_watcher(
        &self,
        watcher: &Arc<CacheWatcher>,
    ) -> bool {
        let Some(next) = watcher.next_bookmark_time(Instant::now(), self.frequency) else {
            return false;
        };
        let mut id = self.bucket_id(next);
        let mut state = self.inner.lock();
        if id < state.start_bucket {
            id = state.start_bucket;
        }
        state.buckets.entry(id).or_default().push(watcher.clone());
        true
    }

    /// Pop every watcher whose scheduled bucket has arrived.
    pub(crate) fn pop_expired(&self) -> Vec<Arc<CacheWatcher>> {
        let current = self.bucket_id(Instant::now());
        let mut expired = Vec::new();
        let mut state = self.inner.lock();
        while state.start_bucket <= current {
            let start_bucket = state.start_bucket;
            if let Some(watchers) = state.buckets.remove(&start_bucket) {
                expired.extend(watchers);
            }
            state.start_bucket += 1;
        }
        expired
    }

    #[cfg(test)]
    pub(crate) fn scheduled_count(&self) -> usize {
        self.inner.lock().buckets.values().map(Vec::len).sum()
    }
}

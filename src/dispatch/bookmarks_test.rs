#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::super::bookmarks::BookmarkTimeBuckets;
    use super::super::watcher::CacheWatcher;
    use crate::object::filter_with_attrs;
    use crate::object::Predicate;

    fn watcher(
        allow_bookmarks: bool,
        deadline: Option<Instant>,
    ) -> Arc<CacheWatcher> {
        CacheWatcher::new(
            4,
            filter_with_attrs("/r/w".to_string(), Predicate::everything()),
            deadline,
            allow_bookmarks,
            "test".to_string(),
            "widgets".to_string(),
        )
    }

    #[tokio::test]
    async fn test_no_bookmark_watcher_not_scheduled() {
        let buckets = BookmarkTimeBuckets::new(Duration::from_secs(60));
        assert!(!buckets.add_watcher(&watcher(false, None)));
        assert_eq!(buckets.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn test_far_frequency_not_yet_due() {
        let buckets = BookmarkTimeBuckets::new(Duration::from_secs(60));
        assert!(buckets.add_watcher(&watcher(true, None)));
        assert_eq!(buckets.scheduled_count(), 1);
        assert!(buckets.pop_expired().is_empty());
        assert_eq!(buckets.scheduled_count(), 1);
    }

    #[tokio::test]
    async fn test_imminent_deadline_schedules_now() {
        let buckets = BookmarkTimeBuckets::new(Duration::from_secs(60));
        // Deadline closer than the bookmark margin: the final bookmark is
        // due immediately.
        let deadline = Instant::now() + Duration::from_millis(500);
        assert!(buckets.add_watcher(&watcher(true, Some(deadline))));

        let expired = buckets.pop_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(buckets.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_beats_frequency() {
        let buckets = BookmarkTimeBuckets::new(Duration::from_secs(60));
        // A deadline in 3s schedules the bookmark ~2s out, well before the
        // 60s frequency bucket.
        let deadline = Instant::now() + Duration::from_secs(3);
        let w = watcher(true, Some(deadline));
        let next = w
            .next_bookmark_time(Instant::now(), Duration::from_secs(60))
            .expect("scheduled");
        let until = next.saturating_duration_since(Instant::now());
        assert!(until <= Duration::from_secs(2), "{until:?}");
        assert!(buckets.add_watcher(&w));
        assert!(buckets.pop_expired().is_empty());
    }

    #[tokio::test]
    async fn test_pop_expired_advances_start_bucket() {
        let buckets = BookmarkTimeBuckets::new(Duration::from_secs(60));
        let deadline = Instant::now() + Duration::from_millis(100);
        buckets.add_watcher(&watcher(true, Some(deadline)));
        assert_eq!(buckets.pop_expired().len(), 1);

        // A watcher scheduled into an already-popped bucket lands in the
        // current one instead and still pops.
        let past_deadline = Instant::now() + Duration::from_millis(100);
        buckets.add_watcher(&watcher(true, Some(past_deadline)));
        assert_eq!(buckets.pop_expired().len(), 1);
    }
}

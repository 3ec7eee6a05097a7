#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio::time::Duration;

    use super::super::watch_cache::WatchCache;
    use super::super::StoreIndexSpec;
    use crate::config::CacheConfig;
    use crate::event::CacheEvent;
    use crate::event::EventType;
    use crate::object::default_attrs_fn;
    use crate::test_utils::labeled_object;
    use crate::test_utils::object;
    use crate::test_utils::store_event;

    fn new_cache(
        config: CacheConfig,
    ) -> (Arc<WatchCache>, mpsc::Receiver<Arc<CacheEvent>>) {
        WatchCache::new("widgets", &config, default_attrs_fn(), Vec::new(), false)
    }

    fn small_config() -> CacheConfig {
        CacheConfig {
            ring_capacity: 3,
            ring_capacity_ceiling: 3,
            // Window of zero so a full ring always evicts instead of growing.
            event_fresh_window_ms: 0,
            freshness_wait_timeout_ms: 200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_assimilate_updates_state_and_emits() {
        let (cache, mut rx) = new_cache(small_config());
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/a", "default", "a", 10))
            .await
            .expect("assimilate");

        assert_eq!(cache.resource_version(), 10);
        assert_eq!(cache.store_len(), 1);
        let event = rx.recv().await.expect("event");
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.resource_version, 10);
    }

    #[tokio::test]
    async fn test_assimilate_normalizes_add_over_existing_to_modified() {
        let (cache, mut rx) = new_cache(small_config());
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/a", "default", "a", 10))
            .await
            .expect("assimilate");
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/a", "default", "a", 11))
            .await
            .expect("assimilate");

        rx.recv().await.expect("added");
        let event = rx.recv().await.expect("second");
        assert_eq!(event.event_type, EventType::Modified);
        assert!(event.prev_object.is_some());
        assert_eq!(
            event.prev_object.as_ref().expect("prev").resource_version,
            10
        );
    }

    #[tokio::test]
    async fn test_delete_removes_from_store_and_keeps_prev() {
        let (cache, mut rx) = new_cache(small_config());
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/a", "default", "a", 10))
            .await
            .expect("assimilate");
        cache
            .assimilate(store_event(EventType::Deleted, "/r/w/default/a", "default", "a", 15))
            .await
            .expect("assimilate");

        assert_eq!(cache.store_len(), 0);
        rx.recv().await.expect("added");
        let event = rx.recv().await.expect("deleted");
        assert_eq!(event.event_type, EventType::Deleted);
        assert_eq!(event.resource_version, 15);
        assert!(event.prev_attrs.is_some());
    }

    #[tokio::test]
    async fn test_out_of_order_event_skipped() {
        let (cache, mut rx) = new_cache(small_config());
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/a", "default", "a", 10))
            .await
            .expect("assimilate");
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/b", "default", "b", 10))
            .await
            .expect("assimilate duplicate rv");

        assert_eq!(cache.resource_version(), 10);
        assert_eq!(cache.store_len(), 1);
        rx.recv().await.expect("first");
        assert!(
            timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
            "skipped event must not be emitted"
        );
    }

    #[tokio::test]
    async fn test_ring_eviction_at_capacity() {
        let (cache, mut rx) = new_cache(small_config());
        for rv in 1..=5u64 {
            cache
                .assimilate(store_event(
                    EventType::Added,
                    &format!("/r/w/default/o{rv}"),
                    "default",
                    &format!("o{rv}"),
                    rv * 10,
                ))
                .await
                .expect("assimilate");
            rx.recv().await.expect("drain");
        }

        assert_eq!(cache.ring_len(), 3);
        // Events 10 and 20 were evicted; the ring cannot prove nothing
        // happened between 20 and the oldest retained revision 30.
        let err = cache.interval_since(20).expect_err("too old");
        assert!(err.is_too_old());
        let interval = cache.interval_since(29).expect("covered");
        assert_eq!(interval.len(), 3);
    }

    #[tokio::test]
    async fn test_ring_grows_while_window_is_short() {
        let config = CacheConfig {
            ring_capacity: 2,
            ring_capacity_ceiling: 8,
            // A fresh window far in the future: the ring always prefers growth.
            event_fresh_window_ms: 3_600_000,
            ..Default::default()
        };
        let (cache, mut rx) = new_cache(config);
        for rv in 1..=6u64 {
            cache
                .assimilate(store_event(
                    EventType::Added,
                    &format!("/r/w/default/o{rv}"),
                    "default",
                    &format!("o{rv}"),
                    rv,
                ))
                .await
                .expect("assimilate");
            rx.recv().await.expect("drain");
        }
        assert!(cache.ring_capacity() > 2);
        assert_eq!(cache.ring_len(), 6);
        // Nothing evicted, so the full history is still replayable.
        assert_eq!(cache.interval_since(0).expect("covered").len(), 6);
    }

    #[tokio::test]
    async fn test_wait_until_fresh_blocks_then_wakes() {
        let (cache, mut rx) = new_cache(small_config());
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_until_fresh_and_get(10, "/r/w/default/a").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/a", "default", "a", 10))
            .await
            .expect("assimilate");
        rx.recv().await.expect("drain");

        let (found, rv) = waiter.await.expect("join").expect("fresh get");
        assert_eq!(rv, 10);
        assert_eq!(found.expect("present").name, "a");
    }

    #[tokio::test]
    async fn test_wait_until_fresh_times_out() {
        let (cache, _rx) = new_cache(small_config());
        let err = cache
            .wait_until_fresh_and_get(99, "/r/w/default/a")
            .await
            .expect_err("never fresh");
        assert!(matches!(
            err,
            crate::Error::Cache(crate::CacheError::FreshnessTimeout { requested: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_swaps_state_and_fails_old_replays() {
        let (cache, mut rx) = new_cache(small_config());
        cache
            .assimilate(store_event(EventType::Added, "/r/w/default/a", "default", "a", 10))
            .await
            .expect("assimilate");
        rx.recv().await.expect("drain");

        cache.replace(
            vec![
                object("/r/w/default/b", "default", "b", 90),
                object("/r/w/default/c", "default", "c", 95),
            ],
            100,
        );

        assert_eq!(cache.resource_version(), 100);
        assert_eq!(cache.store_len(), 2);
        assert!(cache.get_by_key("/r/w/default/a").is_none());

        let err = cache.interval_since(50).expect_err("pre-replace revision");
        assert!(err.is_too_old());
        // Replay from the snapshot revision itself is fine and empty.
        assert_eq!(cache.interval_since(100).expect("ok").len(), 0);
    }

    #[tokio::test]
    async fn test_replace_runs_on_replace_hook() {
        let (cache, _rx) = new_cache(small_config());
        let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
        cache.set_on_replace(Box::new(move || {
            let _ = hook_tx.send(());
        }));

        cache.replace(Vec::new(), 5);
        hook_rx.recv().await.expect("hook ran");
    }

    #[tokio::test]
    async fn test_interval_from_store_in_key_order() {
        let (cache, _rx) = new_cache(small_config());
        cache.replace(
            vec![
                object("/r/w/default/b", "default", "b", 11),
                object("/r/w/default/a", "default", "a", 10),
            ],
            20,
        );

        let mut interval = cache.interval_from_store();
        assert_eq!(interval.resource_version(), 20);
        assert_eq!(interval.next().expect("first").object.name, "a");
        assert_eq!(interval.next().expect("second").object.name, "b");
        assert!(interval.next().is_none());
    }

    #[tokio::test]
    async fn test_update_resource_version_emits_bookmark() {
        let (cache, mut rx) = new_cache(small_config());
        cache.update_resource_version(42).await.expect("update");
        assert_eq!(cache.resource_version(), 42);
        let event = rx.recv().await.expect("bookmark");
        assert_eq!(event.event_type, EventType::Bookmark);
        assert_eq!(event.resource_version, 42);
        // The ring holds object changes only.
        assert_eq!(cache.ring_len(), 0);
    }

    #[tokio::test]
    async fn test_list_uses_named_index() {
        let index = StoreIndexSpec::new("by-tier", |obj: &crate::object::Object| {
            obj.labels.get("tier").map(|v| vec![v.clone()]).unwrap_or_default()
        });
        let (cache, mut rx) = WatchCache::new(
            "widgets",
            &small_config(),
            default_attrs_fn(),
            vec![index],
            false,
        );

        for (name, tier, rv) in [("a", "web", 10), ("b", "db", 11), ("c", "web", 12)] {
            cache
                .assimilate(store_event_with_label(name, tier, rv))
                .await
                .expect("assimilate");
            rx.recv().await.expect("drain");
        }

        let (items, rv, used) = cache
            .wait_until_fresh_and_list(0, Some(("by-tier".to_string(), "web".to_string())))
            .await
            .expect("list");
        assert_eq!(rv, 12);
        assert_eq!(used, "by-tier");
        let mut names: Vec<String> = items.iter().map(|o| o.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);

        // Unknown index falls back to the full scan.
        let (all, _, used) = cache
            .wait_until_fresh_and_list(0, Some(("by-node".to_string(), "n1".to_string())))
            .await
            .expect("list");
        assert_eq!(used, "");
        assert_eq!(all.len(), 3);
    }

    fn store_event_with_label(
        name: &str,
        tier: &str,
        rv: u64,
    ) -> crate::event::StoreEvent {
        crate::event::StoreEvent {
            event_type: EventType::Added,
            object: labeled_object(
                &format!("/r/w/default/{name}"),
                "default",
                name,
                rv,
                &[("tier", tier)],
            ),
            prev_object: None,
        }
    }

    #[tokio::test]
    async fn test_suggested_channel_sizes() {
        let (no_trigger, _rx) = new_cache(small_config());
        assert_eq!(no_trigger.suggested_watch_channel_size(false), 128);

        let (with_trigger, _rx2) =
            WatchCache::new("widgets", &small_config(), default_attrs_fn(), Vec::new(), true);
        assert_eq!(with_trigger.suggested_watch_channel_size(true), 16);
        assert_eq!(with_trigger.suggested_watch_channel_size(false), 1024);
    }
}

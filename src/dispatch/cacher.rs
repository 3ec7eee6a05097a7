use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use autometrics::autometrics;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::bookmarks::BookmarkTimeBuckets;
use super::budget::TimeBudget;
use super::registry::WatcherIndex;
use super::registry::WatcherScope;
use super::watcher::convert_event;
use super::watcher::CacheWatcher;
use super::watcher::ForgetFn;
use super::watcher::WatchHandle;
use crate::cache::StoreIndexSpec;
use crate::cache::WatchCache;
use crate::config::CacheConfig;
use crate::constants::WATCH_OUTPUT_BUFFER;
use crate::errors::CacheError;
use crate::errors::Error;
use crate::errors::StorageError;
use crate::event::CacheEvent;
use crate::event::ObjectAttrs;
use crate::event::WatchEvent;
use crate::metrics;
use crate::object::default_attrs_fn;
use crate::object::filter_with_attrs;
use crate::object::AttrsFn;
use crate::object::Object;
use crate::object::Predicate;
use crate::ready::ReadyGate;
use crate::reflector;
use crate::storage::check_codec;
use crate::storage::BackingStore;
use crate::storage::BincodeCodec;
use crate::storage::Codec;
use crate::storage::DecimalVersioner;
use crate::storage::GetOptions;
use crate::storage::ListOptions;
use crate::storage::ListResult;
use crate::storage::UpdateFn;
use crate::storage::VersionMatch;
use crate::storage::Versioner;
use crate::storage::WatchOptions;
use crate::Result;
use crate::API_SLO;

/// Single-field trigger index: when a watcher's field selector pins this
/// field to an exact value, fan-out for an event narrows to the watchers
/// registered under the event's value.
#[derive(Clone)]
pub struct IndexedTrigger {
    pub name: String,
    pub value_fn: Arc<dyn Fn(&Object) -> String + Send + Sync>,
}

impl IndexedTrigger {
    pub fn new(
        name: impl Into<String>,
        value_fn: impl Fn(&Object) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            value_fn: Arc::new(value_fn),
        }
    }
}

impl std::fmt::Debug for IndexedTrigger {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("IndexedTrigger").field("name", &self.name).finish()
    }
}

/// Everything a cache instance is parameterised by, passed explicitly at
/// construction.
pub struct CacherConfig {
    pub store: Arc<dyn BackingStore>,
    pub versioner: Arc<dyn Versioner>,
    pub codec: Arc<dyn Codec>,
    /// Resource label used in logs and metrics, e.g. `widgets`
    pub resource: String,
    /// Storage path every cached object lives under
    pub resource_prefix: String,
    pub get_attrs: AttrsFn,
    /// At most one trigger index is supported
    pub triggers: Vec<IndexedTrigger>,
    /// Secondary indexes accelerating filtered lists
    pub indexes: Vec<StoreIndexSpec>,
    pub cache: CacheConfig,
}

impl CacherConfig {
    pub fn new(
        store: Arc<dyn BackingStore>,
        resource: impl Into<String>,
        resource_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            versioner: Arc::new(DecimalVersioner),
            codec: Arc::new(BincodeCodec),
            resource: resource.into(),
            resource_prefix: resource_prefix.into(),
            get_attrs: default_attrs_fn(),
            triggers: Vec::new(),
            indexes: Vec::new(),
            cache: CacheConfig::default(),
        }
    }
}

pub(crate) struct DispatchState {
    pub(crate) watcher_idx: u64,
    pub(crate) watchers: WatcherIndex,
    /// True while one event's dispatch is in flight; stops are deferred
    pub(crate) dispatching: bool,
    pub(crate) to_stop: Vec<Arc<CacheWatcher>>,
    pub(crate) expired_bookmarks: Vec<Arc<CacheWatcher>>,
}

pub(crate) struct CacherInner {
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) versioner: Arc<dyn Versioner>,
    pub(crate) resource: String,
    pub(crate) resource_prefix: String,
    pub(crate) get_attrs: AttrsFn,
    pub(crate) watch_cache: Arc<WatchCache>,
    pub(crate) ready: ReadyGate,
    pub(crate) state: Mutex<DispatchState>,
    pub(crate) budget: TimeBudget,
    pub(crate) bookmark_watchers: BookmarkTimeBuckets,
    pub(crate) trigger: Option<IndexedTrigger>,
    pub(crate) config: CacheConfig,
    pub(crate) stop_token: CancellationToken,
}

/// Watch-and-list cache fronting a strongly-consistent versioned store.
///
/// Reads and watches at a minimum freshness are served from memory;
/// mutations and reads demanding the latest state pass through to the
/// store. One background reflector keeps the cache populated; one
/// dispatcher fans events out to the registered watchers.
pub struct Cacher {
    inner: Arc<CacherInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Cacher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cacher")
            .field("resource", &self.inner.resource)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Cacher {
    /// Build the cache and start its background tasks. Must be called from
    /// within a tokio runtime.
    pub fn from_config(config: CacherConfig) -> Result<Self> {
        config.cache.validate()?;
        // Fail a mismatched codec here rather than on the first event.
        check_codec(config.codec.as_ref())?;
        if config.triggers.len() > 1 {
            return Err(CacheError::TooManyTriggerIndexes(config.triggers.len()).into());
        }
        let trigger = config.triggers.into_iter().next();

        let (watch_cache, incoming_rx) = WatchCache::new(
            config.resource.clone(),
            &config.cache,
            config.get_attrs.clone(),
            config.indexes,
            trigger.is_some(),
        );

        let inner = Arc::new(CacherInner {
            store: config.store,
            versioner: config.versioner,
            resource: config.resource,
            resource_prefix: config.resource_prefix,
            get_attrs: config.get_attrs,
            watch_cache: watch_cache.clone(),
            ready: ReadyGate::new(),
            state: Mutex::new(DispatchState {
                watcher_idx: 0,
                watchers: WatcherIndex::default(),
                dispatching: false,
                to_stop: Vec::new(),
                expired_bookmarks: Vec::new(),
            }),
            budget: TimeBudget::new(
                config.cache.dispatch_budget_cap(),
                config.cache.dispatch_budget_refresh(),
            ),
            bookmark_watchers: BookmarkTimeBuckets::new(config.cache.bookmark_frequency()),
            trigger,
            config: config.cache,
            stop_token: CancellationToken::new(),
        });

        let on_replace = {
            let weak = Arc::downgrade(&inner);
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.ready.set(true);
                    metrics::INITIALIZATIONS
                        .with_label_values(&[&inner.resource])
                        .inc();
                    info!(resource = %inner.resource, "Cache initialized");
                }
            })
        };
        watch_cache.set_on_replace(on_replace);

        let dispatcher = tokio::spawn(inner.clone().dispatch_events(incoming_rx));
        let reflector = tokio::spawn(reflector::run(inner.clone()));

        Ok(Self {
            inner,
            tasks: Mutex::new(vec![dispatcher, reflector]),
            stopped: AtomicBool::new(false),
        })
    }

    /// Graceful termination: fail the gate, stop the background tasks, and
    /// close every watcher.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.ready.stop();
        self.inner.stop_token.cancel();
        self.inner.terminate_all_watchers();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        debug!(resource = %self.inner.resource, "Cacher stopped");
    }

    /// Point read honoring the resource-version semantics: empty delegates,
    /// "0" serves any cached view, N blocks until the cache reaches N.
    #[autometrics(objective = API_SLO)]
    pub async fn get(
        &self,
        key: &str,
        opts: GetOptions,
    ) -> Result<Option<Object>> {
        let inner = &self.inner;
        if opts.resource_version.is_empty() {
            return Self::require_found(
                inner.store.get(key, opts.clone()).await?,
                key,
                0,
                opts.ignore_not_found,
            );
        }

        let requested = inner.versioner.parse(&opts.resource_version)?;
        if requested == 0 && !inner.ready.check() {
            return Self::require_found(
                inner.store.get(key, opts.clone()).await?,
                key,
                0,
                opts.ignore_not_found,
            );
        }

        inner.ready.wait().await?;
        let (found, read_rv) = inner.watch_cache.wait_until_fresh_and_get(requested, key).await?;
        Self::require_found(
            found.map(|o| (*o).clone()),
            key,
            read_rv,
            opts.ignore_not_found,
        )
    }

    fn require_found(
        found: Option<Object>,
        key: &str,
        revision: u64,
        ignore_not_found: bool,
    ) -> Result<Option<Object>> {
        match found {
            Some(obj) => Ok(Some(obj)),
            None if ignore_not_found => Ok(None),
            None => Err(StorageError::KeyNotFound {
                key: key.to_string(),
                revision,
            }
            .into()),
        }
    }

    /// Filtered list under `prefix`. Delegates whenever the cache cannot
    /// honor the request: no resource version, continuation, a limit at a
    /// non-zero revision, or exact-revision matching.
    #[autometrics(objective = API_SLO)]
    pub async fn get_list(
        &self,
        prefix: &str,
        opts: ListOptions,
    ) -> Result<ListResult> {
        let inner = &self.inner;
        if Self::should_delegate_list(&opts) {
            return inner.store.get_list(prefix, opts).await;
        }

        let requested = inner.versioner.parse(&opts.resource_version)?;
        if requested == 0 && !inner.ready.check() {
            return inner.store.get_list(prefix, opts).await;
        }

        inner.ready.wait().await?;
        let hint = opts.predicate.matcher_index();
        let (objects, read_rv, index_used) =
            inner.watch_cache.wait_until_fresh_and_list(requested, hint).await?;

        let filter = filter_with_attrs(prefix.to_string(), opts.predicate.clone());
        let mut items = Vec::new();
        for obj in objects {
            let (labels, fields) = (inner.get_attrs)(&obj);
            if filter(&obj.key, &labels, &fields) {
                items.push((*obj).clone());
            }
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        metrics::LIST_CACHE_COUNT
            .with_label_values(&[&inner.resource, &index_used])
            .inc();

        Ok(ListResult {
            items,
            resource_version: read_rv,
            continue_token: None,
        })
    }

    fn should_delegate_list(opts: &ListOptions) -> bool {
        opts.resource_version.is_empty()
            || opts.continue_token.is_some()
            || (opts.limit > 0 && opts.resource_version != "0")
            || !matches!(opts.version_match, VersionMatch::Unset | VersionMatch::NotOlderThan)
    }

    /// Open a watch under `key`. Once the request is accepted, failures
    /// surface as a single `Error` event on the handle, never as a
    /// returned error.
    #[autometrics(objective = API_SLO)]
    pub async fn watch(
        &self,
        key: &str,
        opts: WatchOptions,
    ) -> Result<WatchHandle> {
        let inner = &self.inner;
        // Without an explicit start point the freshest view wins, and only
        // the store can provide it.
        if opts.send_initial_events.is_none() && opts.resource_version.is_empty() {
            return self.delegate_watch(key, opts).await;
        }

        let requested = inner.versioner.parse(&opts.resource_version)?;
        let ready_generation = inner.ready.wait_and_read_generation().await?;

        let scope = inner.infer_scope(key, &opts.predicate);
        let (trigger_value, trigger_supported) = inner.infer_trigger(&opts.predicate);
        let buffer = inner.watch_cache.suggested_watch_channel_size(trigger_supported);

        let force_initial = opts.send_initial_events == Some(true);
        if force_initial {
            if let Err(e) = inner.watch_cache.wait_until_fresh(requested).await {
                return Ok(Self::error_handle(e));
            }
        }

        // The start revision may come from the store itself when no
        // resource version was supplied.
        let store_rv = if opts.resource_version.is_empty() {
            match inner.current_store_revision().await {
                Ok(rv) => Some(rv),
                Err(e) => return Ok(Self::error_handle(e)),
            }
        } else {
            None
        };

        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let identifier = format!("key: {key:?}, scope: {}/{}", scope.namespace, scope.name);
        let watcher = CacheWatcher::new(
            buffer,
            filter_with_attrs(key.to_string(), opts.predicate.clone()),
            deadline,
            opts.allow_bookmarks,
            identifier,
            inner.resource.clone(),
        );

        {
            let mut state = inner.state.lock();
            let (ok, generation) = inner.ready.check_and_read_generation();
            if !ok || generation != ready_generation {
                // The cache reinitialized while this registration was in
                // flight; the watcher cannot span a re-list boundary.
                return Ok(WatchHandle::closed());
            }
            let id = state.watcher_idx;
            state.watcher_idx += 1;
            watcher.set_forget(inner.forget_fn(id, scope.clone(), trigger_value.clone(), trigger_supported));
            state
                .watchers
                .add_watcher(watcher.clone(), id, scope, trigger_value, trigger_supported);
            if watcher.allow_bookmarks() {
                inner.bookmark_watchers.add_watcher(&watcher);
            }
        }

        // The replay interval is taken only after the watcher is visible to
        // the dispatcher: anything assimilated in between shows up both in
        // the interval and in the input buffer, and the live phase drops
        // the duplicates through its monotone check. Computing it before
        // registration would instead lose those events entirely.
        let cache_rv = inner.watch_cache.resource_version();
        let resolved = store_rv.unwrap_or(if requested == 0 { cache_rv } else { requested });
        let start_rv = if force_initial { requested } else { resolved };
        if force_initial && opts.allow_bookmarks {
            watcher.set_bookmark_after(resolved);
        }

        let interval = if force_initial {
            inner.watch_cache.interval_from_store()
        } else {
            match inner.watch_cache.interval_since(start_rv) {
                Ok(interval) => interval,
                Err(e) => {
                    watcher.call_forget(false);
                    return Ok(Self::error_handle(e));
                }
            }
        };

        let (output_tx, output_rx) = mpsc::channel(WATCH_OUTPUT_BUFFER);
        let send_initial_bookmark = force_initial && opts.allow_bookmarks;
        tokio::spawn(watcher.clone().run(
            output_tx,
            interval,
            start_rv,
            send_initial_bookmark,
        ));
        Ok(WatchHandle::new(output_rx, watcher))
    }

    fn error_handle(error: Error) -> WatchHandle {
        let cache_error = match error {
            Error::Cache(e) => e,
            other => CacheError::ServiceUnavailable(other.to_string()),
        };
        WatchHandle::from_error(cache_error)
    }

    /// Watch served straight from the store, with the predicate applied
    /// and selector transitions relabelled on the way through.
    async fn delegate_watch(
        &self,
        key: &str,
        opts: WatchOptions,
    ) -> Result<WatchHandle> {
        let inner = self.inner.clone();
        let mut store_watch = inner.store.watch(key, opts.clone()).await?;
        let (tx, rx) = mpsc::channel(WATCH_OUTPUT_BUFFER);
        let filter = filter_with_attrs(key.to_string(), opts.predicate.clone());
        let allow_bookmarks = opts.allow_bookmarks;

        tokio::spawn(async move {
            while let Some(item) = store_watch.events.recv().await {
                match item {
                    Ok(store_event) => {
                        let event = inner.cache_event_from_store(store_event);
                        if let Some(watch_event) = convert_event(&filter, allow_bookmarks, 0, &event)
                        {
                            if tx.send(watch_event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(WatchEvent::Error(CacheError::ServiceUnavailable(
                                e.to_string(),
                            )))
                            .await;
                        return;
                    }
                }
            }
        });
        Ok(WatchHandle::detached(rx))
    }

    /// Create delegates unconditionally; the cache observes the result
    /// through its reflector.
    pub async fn create(
        &self,
        obj: Object,
    ) -> Result<Object> {
        self.inner.store.create(obj).await
    }

    /// Delete passes the cached current object down as the optimistic base
    /// value when one is known.
    pub async fn delete(
        &self,
        key: &str,
    ) -> Result<Object> {
        let hint = self.inner.watch_cache.get_by_key(key).map(|o| (*o).clone());
        self.inner.store.delete(key, hint).await
    }

    /// Compare-and-swap update with the cached current object as the hint.
    pub async fn guaranteed_update(
        &self,
        key: &str,
        update: UpdateFn,
    ) -> Result<Object> {
        let hint = self.inner.watch_cache.get_by_key(key).map(|o| (*o).clone());
        self.inner.store.guaranteed_update(key, update, hint).await
    }

    pub async fn count(
        &self,
        prefix: &str,
    ) -> Result<i64> {
        self.inner.store.count(prefix).await
    }

    /// Revision the cache is currently synced to. Waits for readiness.
    pub async fn last_sync_resource_version(&self) -> Result<u64> {
        self.inner.ready.wait().await?;
        Ok(self.inner.watch_cache.resource_version())
    }

    /// Whether the cache currently serves reads.
    pub fn ready(&self) -> bool {
        self.inner.ready.check()
    }
}

impl Drop for Cacher {
    fn drop(&mut self) {
        self.inner.ready.stop();
        self.inner.stop_token.cancel();
        self.inner.terminate_all_watchers();
    }
}

impl CacherInner {
    /// Scope inference: path segments under the resource prefix first
    /// (`<prefix>/<namespace>/<name>`), field selector fallback second.
    fn infer_scope(
        &self,
        key: &str,
        predicate: &Predicate,
    ) -> WatcherScope {
        let relative = key
            .strip_prefix(self.resource_prefix.as_str())
            .unwrap_or("")
            .trim_matches('/');
        let mut segments = relative.split('/').filter(|s| !s.is_empty());
        let mut namespace = segments.next().unwrap_or("").to_string();
        let mut name = segments.next().unwrap_or("").to_string();

        if namespace.is_empty() {
            if let Some(selected) = predicate.requires_exact_match("metadata.namespace") {
                namespace = selected.to_string();
            }
        }
        if name.is_empty() {
            if let Some(selected) = predicate.requires_exact_match("metadata.name") {
                name = selected.to_string();
            }
        }
        WatcherScope::new(namespace, name)
    }

    /// A watcher supports the trigger index iff it declared the trigger
    /// field and its selector pins it to an exact value.
    fn infer_trigger(
        &self,
        predicate: &Predicate,
    ) -> (String, bool) {
        let Some(trigger) = &self.trigger else {
            return (String::new(), false);
        };
        for field in &predicate.index_fields {
            if *field == trigger.name {
                if let Some(value) = predicate.requires_exact_match(field) {
                    return (value.to_string(), true);
                }
            }
        }
        (String::new(), false)
    }

    /// Trigger values for an event: the current value plus the previous
    /// one when it differs. `None` when no trigger index is configured.
    pub(crate) fn trigger_values(
        &self,
        event: &CacheEvent,
    ) -> Option<Vec<String>> {
        let trigger = self.trigger.as_ref()?;
        let mut values = vec![(trigger.value_fn)(&event.object)];
        if let Some(prev) = &event.prev_object {
            let prev_value = (trigger.value_fn)(prev);
            if prev_value != values[0] {
                values.push(prev_value);
            }
        }
        Some(values)
    }

    pub(crate) fn cache_event_from_store(
        &self,
        store_event: crate::event::StoreEvent,
    ) -> CacheEvent {
        let object = Arc::new(store_event.object);
        let (labels, fields) = (self.get_attrs)(&object);
        let prev_object = store_event.prev_object.map(Arc::new);
        let prev_attrs = prev_object.as_ref().map(|prev| {
            let (labels, fields) = (self.get_attrs)(prev);
            ObjectAttrs { labels, fields }
        });
        CacheEvent {
            event_type: store_event.event_type,
            resource_version: object.resource_version,
            key: object.key.clone(),
            namespace: object.namespace.clone(),
            name: object.name.clone(),
            attrs: ObjectAttrs { labels, fields },
            prev_attrs,
            prev_object,
            object,
        }
    }

    pub(crate) async fn current_store_revision(&self) -> Result<u64> {
        let result = self
            .store
            .get_list(
                &self.resource_prefix,
                ListOptions {
                    limit: 1,
                    ..Default::default()
                },
            )
            .await?;
        if result.resource_version == 0 {
            return Err(StorageError::Internal(
                "store reported revision 0".to_string(),
            )
            .into());
        }
        Ok(result.resource_version)
    }

    /// The closure handed to each watcher at registration; carries the
    /// watcher's indexing coordinates so the watcher never learns the
    /// registry shape, and holds only a weak back-reference to the cache.
    pub(crate) fn forget_fn(
        self: &Arc<Self>,
        id: u64,
        scope: WatcherScope,
        trigger_value: String,
        trigger_supported: bool,
    ) -> ForgetFn {
        let weak: Weak<CacherInner> = Arc::downgrade(self);
        Arc::new(move |drain: bool| {
            let Some(inner) = weak.upgrade() else { return };
            let mut state = inner.state.lock();
            if let Some(watcher) =
                state
                    .watchers
                    .delete_watcher(id, &scope, &trigger_value, trigger_supported)
            {
                watcher.set_drain(drain);
                Self::stop_watcher_locked(&mut state, watcher);
                metrics::TERMINATED_WATCHERS
                    .with_label_values(&[&inner.resource, "false"])
                    .inc();
            }
        })
    }

    /// Stops are deferred while a dispatch is in flight to avoid racing a
    /// close against an in-progress send.
    pub(crate) fn stop_watcher_locked(
        state: &mut DispatchState,
        watcher: Arc<CacheWatcher>,
    ) {
        if state.dispatching {
            state.to_stop.push(watcher);
        } else {
            watcher.stop();
        }
    }

    pub(crate) fn terminate_all_watchers(&self) {
        let mut state = self.state.lock();
        let watchers = state.watchers.terminate_all();
        if !watchers.is_empty() {
            warn!(resource = %self.resource, count = watchers.len(), "Terminating all watchers");
        }
        for watcher in watchers {
            Self::stop_watcher_locked(&mut state, watcher);
            metrics::TERMINATED_WATCHERS
                .with_label_values(&[&self.resource, "false"])
                .inc();
        }
    }
}

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

use super::index::StoreIndexes;
use super::interval::CacheInterval;
use super::StoreIndexSpec;
use crate::config::CacheConfig;
use crate::constants::CHANNEL_SIZE_NO_TRIGGER;
use crate::constants::CHANNEL_SIZE_TRIGGER_SUPPORTED;
use crate::constants::CHANNEL_SIZE_TRIGGER_UNSUPPORTED;
use crate::errors::CacheError;
use crate::event::CacheEvent;
use crate::event::EventType;
use crate::event::ObjectAttrs;
use crate::event::StoreEvent;
use crate::metrics;
use crate::object::AttrsFn;
use crate::object::Object;
use crate::Result;

/// Hook invoked after every successful Replace; flips readiness on.
pub(crate) type OnReplaceFn = Box<dyn Fn() + Send + Sync>;

struct RingEntry {
    event: Arc<CacheEvent>,
    at: Instant,
}

struct CacheState {
    /// Recent events in strictly increasing revision order
    ring: VecDeque<RingEntry>,
    capacity: usize,
    /// Current state by storage key
    store: HashMap<String, Arc<Object>>,
    indexes: StoreIndexes,
    /// Highest revision assimilated
    resource_version: u64,
    /// Revision of the last Replace; floor for replay when the ring is empty
    list_resource_version: u64,
    on_replace: Option<OnReplaceFn>,
}

/// The sliding window of recent changes plus the current state.
///
/// Single-writer: only the reflector mutates it. Readers wait for freshness
/// on a revision channel and then take snapshots under the read lock; the
/// revision is monotone, so a snapshot taken after the wait can only be
/// fresher than requested.
pub(crate) struct WatchCache {
    state: RwLock<CacheState>,
    resource: String,
    rv_tx: watch::Sender<u64>,
    rv_rx: watch::Receiver<u64>,
    incoming: mpsc::Sender<Arc<CacheEvent>>,
    get_attrs: AttrsFn,
    fresh_window: Duration,
    capacity_ceiling: usize,
    wait_timeout: Duration,
    trigger_defined: bool,
}

impl WatchCache {
    /// Returns the cache and the receiving end of its outbound event
    /// channel, which the dispatcher loop consumes.
    pub(crate) fn new(
        resource: impl Into<String>,
        config: &CacheConfig,
        get_attrs: AttrsFn,
        index_specs: Vec<StoreIndexSpec>,
        trigger_defined: bool,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<CacheEvent>>) {
        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_buffer);
        let (rv_tx, rv_rx) = watch::channel(0u64);
        let cache = Arc::new(Self {
            state: RwLock::new(CacheState {
                ring: VecDeque::with_capacity(config.ring_capacity),
                capacity: config.ring_capacity,
                store: HashMap::new(),
                indexes: StoreIndexes::new(index_specs),
                resource_version: 0,
                list_resource_version: 0,
                on_replace: None,
            }),
            resource: resource.into(),
            rv_tx,
            rv_rx,
            incoming: incoming_tx,
            get_attrs,
            fresh_window: config.event_fresh_window(),
            capacity_ceiling: config.ring_capacity_ceiling,
            wait_timeout: config.freshness_wait_timeout(),
            trigger_defined,
        });
        (cache, incoming_rx)
    }

    pub(crate) fn set_on_replace(
        &self,
        hook: OnReplaceFn,
    ) {
        self.state.write().on_replace = Some(hook);
    }

    pub(crate) fn resource_version(&self) -> u64 {
        self.state.read().resource_version
    }

    /// Assimilate one change from the reflector. Single-writer.
    ///
    /// Blocks when the outbound channel is full: the reflector is the only
    /// caller and must not drop changes.
    pub(crate) async fn assimilate(
        &self,
        store_event: StoreEvent,
    ) -> Result<()> {
        let rv = store_event.resource_version();
        let event = {
            let mut state = self.state.write();
            if rv <= state.resource_version {
                warn!(
                    resource = %self.resource,
                    rv,
                    current = state.resource_version,
                    "Out-of-order event skipped"
                );
                return Ok(());
            }

            let key = store_event.object.key.clone();
            let prev = state.store.get(&key).cloned();

            // Normalize against our own state: a replayed Added over an
            // existing key is a modification from this cache's viewpoint.
            let event_type = match store_event.event_type {
                EventType::Deleted => EventType::Deleted,
                _ if prev.is_some() => EventType::Modified,
                _ => EventType::Added,
            };

            let object = Arc::new(store_event.object);
            let (labels, fields) = (self.get_attrs)(&object);
            let prev_attrs = match &prev {
                Some(p) => {
                    let (l, f) = (self.get_attrs)(p);
                    Some(ObjectAttrs { labels: l, fields: f })
                }
                // Delete of an object we never saw: treat its final state
                // as the previous state so filters still have attributes.
                None if event_type == EventType::Deleted => Some(ObjectAttrs {
                    labels: labels.clone(),
                    fields: fields.clone(),
                }),
                None => None,
            };

            match event_type {
                EventType::Deleted => {
                    if let Some(p) = state.store.remove(&key) {
                        state.indexes.remove(&p);
                    }
                }
                _ => {
                    if let Some(p) = &prev {
                        let p = p.clone();
                        state.indexes.remove(&p);
                    }
                    state.indexes.insert(&object);
                    state.store.insert(key.clone(), object.clone());
                }
            }

            let event = Arc::new(CacheEvent {
                event_type,
                namespace: object.namespace.clone(),
                name: object.name.clone(),
                prev_object: prev,
                resource_version: rv,
                key,
                attrs: ObjectAttrs { labels, fields },
                prev_attrs,
                object,
            });

            Self::ring_push(
                &mut state,
                RingEntry {
                    event: event.clone(),
                    at: Instant::now(),
                },
                self.capacity_ceiling,
                self.fresh_window,
            );
            state.resource_version = rv;
            event
        };

        self.rv_tx.send_replace(rv);
        self.record_incoming_depth();
        self.incoming
            .send(event)
            .await
            .map_err(|_| CacheError::ServiceUnavailable("dispatcher stopped".to_string()))?;
        Ok(())
    }

    fn ring_push(
        state: &mut CacheState,
        entry: RingEntry,
        ceiling: usize,
        fresh_window: Duration,
    ) {
        if state.ring.len() >= state.capacity {
            let covers = state
                .ring
                .front()
                .map(|oldest| entry.at.duration_since(oldest.at))
                .unwrap_or_default();
            // A full ring that spans less history than the target window is
            // undersized for the observed change rate.
            if covers < fresh_window && state.capacity < ceiling {
                state.capacity = (state.capacity * 2).min(ceiling);
            } else {
                state.ring.pop_front();
            }
        }
        state.ring.push_back(entry);
    }

    /// Advance the revision without an object change (store progress
    /// bookmark). Emits a bookmark on the outbound channel; the dispatcher
    /// uses it for bookkeeping only and never fans it out.
    pub(crate) async fn update_resource_version(
        &self,
        rv: u64,
    ) -> Result<()> {
        {
            let mut state = self.state.write();
            if rv <= state.resource_version {
                return Ok(());
            }
            state.resource_version = rv;
        }
        self.rv_tx.send_replace(rv);
        self.incoming
            .send(Arc::new(CacheEvent::bookmark(rv)))
            .await
            .map_err(|_| CacheError::ServiceUnavailable("dispatcher stopped".to_string()))?;
        Ok(())
    }

    /// Swap in a full snapshot from a (re-)list. Clears the ring, resets
    /// the current state, and runs the on-replace hook.
    pub(crate) fn replace(
        &self,
        items: Vec<Object>,
        rv: u64,
    ) {
        {
            let mut state = self.state.write();
            state.store = items
                .into_iter()
                .map(|o| (o.key.clone(), Arc::new(o)))
                .collect();
            let objects: Vec<Arc<Object>> = state.store.values().cloned().collect();
            state.indexes.rebuild(objects.iter().map(|o| o.as_ref()));
            state.ring.clear();
            state.resource_version = rv;
            state.list_resource_version = rv;
            if let Some(hook) = &state.on_replace {
                hook();
            }
            debug!(resource = %self.resource, rv, objects = state.store.len(), "Cache replaced");
        }
        self.rv_tx.send_replace(rv);
    }

    /// Block until the cache has assimilated at least `rv`.
    pub(crate) async fn wait_until_fresh(
        &self,
        rv: u64,
    ) -> Result<()> {
        if rv == 0 || *self.rv_rx.borrow() >= rv {
            return Ok(());
        }
        let mut rx = self.rv_rx.clone();
        let result = tokio::time::timeout(self.wait_timeout, rx.wait_for(|v| *v >= rv)).await;
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(CacheError::Cancelled.into()),
            Err(_) => Err(CacheError::FreshnessTimeout {
                requested: rv,
                current: *self.rv_rx.borrow(),
            }
            .into()),
        }
    }

    /// Point read at minimum freshness `rv`. Returns the value (or None)
    /// together with the revision the read was served at.
    pub(crate) async fn wait_until_fresh_and_get(
        &self,
        rv: u64,
        key: &str,
    ) -> Result<(Option<Arc<Object>>, u64)> {
        self.wait_until_fresh(rv).await?;
        let state = self.state.read();
        Ok((state.store.get(key).cloned(), state.resource_version))
    }

    /// List read at minimum freshness `rv`, optionally narrowed through a
    /// named index. Returns the objects, the snapshot revision, and the
    /// name of the index actually used (empty for a full scan).
    pub(crate) async fn wait_until_fresh_and_list(
        &self,
        rv: u64,
        matcher_hint: Option<(String, String)>,
    ) -> Result<(Vec<Arc<Object>>, u64, String)> {
        self.wait_until_fresh(rv).await?;
        let state = self.state.read();

        if let Some((name, value)) = matcher_hint {
            if let Some(keys) = state.indexes.lookup(&name, &value) {
                let items = keys
                    .iter()
                    .filter_map(|k| state.store.get(k).cloned())
                    .collect();
                return Ok((items, state.resource_version, name));
            }
        }

        let items = state.store.values().cloned().collect();
        Ok((items, state.resource_version, String::new()))
    }

    pub(crate) fn get_by_key(
        &self,
        key: &str,
    ) -> Option<Arc<Object>> {
        self.state.read().store.get(key).cloned()
    }

    /// Events with revision strictly greater than `rv`, or TooOld when the
    /// ring no longer reaches back that far.
    pub(crate) fn interval_since(
        &self,
        rv: u64,
    ) -> Result<CacheInterval> {
        let state = self.state.read();
        let oldest = match state.ring.front() {
            Some(entry) => entry.event.resource_version,
            None => state.list_resource_version + 1,
        };
        if rv < oldest.saturating_sub(1) {
            return Err(CacheError::TooOldResourceVersion {
                requested: rv,
                oldest,
            }
            .into());
        }
        let events = state
            .ring
            .iter()
            .filter(|entry| entry.event.resource_version > rv)
            .map(|entry| entry.event.clone())
            .collect();
        Ok(CacheInterval::Buffered(events))
    }

    /// One synthetic Added per current-state entry, stamped with the
    /// current revision. Deterministic key order.
    pub(crate) fn interval_from_store(&self) -> CacheInterval {
        let state = self.state.read();
        let mut objects: Vec<Arc<Object>> = state.store.values().cloned().collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        CacheInterval::FromStore {
            objects: objects.into(),
            resource_version: state.resource_version,
            get_attrs: self.get_attrs.clone(),
        }
    }

    /// Per-watcher input buffer size. A supported trigger narrows the
    /// fan-out, so those watchers need little slack; watchers that bypass a
    /// configured trigger see every event and get the deep buffer.
    pub(crate) fn suggested_watch_channel_size(
        &self,
        trigger_supported: bool,
    ) -> usize {
        match (self.trigger_defined, trigger_supported) {
            (true, true) => CHANNEL_SIZE_TRIGGER_SUPPORTED,
            (true, false) => CHANNEL_SIZE_TRIGGER_UNSUPPORTED,
            (false, _) => CHANNEL_SIZE_NO_TRIGGER,
        }
    }

    pub(crate) fn record_incoming_depth(&self) {
        metrics::INCOMING_QUEUE_DEPTH
            .with_label_values(&[&self.resource])
            .set((self.incoming.max_capacity() - self.incoming.capacity()) as i64);
    }
}

#[cfg(test)]
impl WatchCache {
    pub(crate) fn ring_len(&self) -> usize {
        self.state.read().ring.len()
    }

    pub(crate) fn ring_capacity(&self) -> usize {
        self.state.read().capacity
    }

    pub(crate) fn store_len(&self) -> usize {
        self.state.read().store.len()
    }
}

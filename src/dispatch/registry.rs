use std::collections::HashMap;
use std::sync::Arc;

use super::watcher::CacheWatcher;

/// Namespace/name scope a watcher is registered under; empty strings mean
/// "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub(crate) struct WatcherScope {
    pub namespace: String,
    pub name: String,
}

impl WatcherScope {
    pub(crate) fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[derive(Default)]
pub(crate) struct WatcherMap {
    watchers: HashMap<u64, Arc<CacheWatcher>>,
}

impl WatcherMap {
    fn add(
        &mut self,
        id: u64,
        watcher: Arc<CacheWatcher>,
    ) {
        self.watchers.insert(id, watcher);
    }

    fn delete(
        &mut self,
        id: u64,
    ) -> Option<Arc<CacheWatcher>> {
        self.watchers.remove(&id)
    }

    fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    fn drain_into(
        &mut self,
        out: &mut Vec<Arc<CacheWatcher>>,
    ) {
        out.extend(self.watchers.drain().map(|(_, w)| w));
    }
}

/// The scope and trigger-value indexes that narrow the fan-out set per
/// event. A watcher lives in exactly one of the two maps: under its scope,
/// or under its trigger value when the trigger index supports it.
#[derive(Default)]
pub(crate) struct WatcherIndex {
    all_watchers: HashMap<WatcherScope, WatcherMap>,
    value_watchers: HashMap<String, WatcherMap>,
}

impl WatcherIndex {
    pub(crate) fn add_watcher(
        &mut self,
        watcher: Arc<CacheWatcher>,
        id: u64,
        scope: WatcherScope,
        trigger_value: String,
        trigger_supported: bool,
    ) {
        if trigger_supported {
            self.value_watchers
                .entry(trigger_value)
                .or_default()
                .add(id, watcher);
        } else {
            self.all_watchers.entry(scope).or_default().add(id, watcher);
        }
    }

    pub(crate) fn delete_watcher(
        &mut self,
        id: u64,
        scope: &WatcherScope,
        trigger_value: &str,
        trigger_supported: bool,
    ) -> Option<Arc<CacheWatcher>> {
        if trigger_supported {
            let removed = self.value_watchers.get_mut(trigger_value)?.delete(id);
            if self
                .value_watchers
                .get(trigger_value)
                .is_some_and(WatcherMap::is_empty)
            {
                self.value_watchers.remove(trigger_value);
            }
            removed
        } else {
            let removed = self.all_watchers.get_mut(scope)?.delete(id);
            if self.all_watchers.get(scope).is_some_and(WatcherMap::is_empty) {
                self.all_watchers.remove(scope);
            }
            removed
        }
    }

    /// Remove and return every watcher; used when the cache goes unready.
    pub(crate) fn terminate_all(&mut self) -> Vec<Arc<CacheWatcher>> {
        let mut out = Vec::new();
        for map in self.all_watchers.values_mut() {
            map.drain_into(&mut out);
        }
        for map in self.value_watchers.values_mut() {
            map.drain_into(&mut out);
        }
        self.all_watchers.clear();
        self.value_watchers.clear();
        out
    }

    /// Append the watchers interested in an event with the given
    /// namespace/name to the dispatch buffer.
    pub(crate) fn collect_scoped(
        &self,
        namespace: &str,
        name: &str,
        buffer: &mut Vec<Arc<CacheWatcher>>,
    ) {
        if !namespace.is_empty() {
            if !name.is_empty() {
                self.collect_scope(&WatcherScope::new(namespace, name), buffer);
            }
            self.collect_scope(&WatcherScope::new(namespace, ""), buffer);
        }
        if !name.is_empty() {
            self.collect_scope(&WatcherScope::new("", name), buffer);
        }
        self.collect_scope(&WatcherScope::default(), buffer);
    }

    fn collect_scope(
        &self,
        scope: &WatcherScope,
        buffer: &mut Vec<Arc<CacheWatcher>>,
    ) {
        if let Some(map) = self.all_watchers.get(scope) {
            buffer.extend(map.watchers.values().cloned());
        }
    }

    /// Append the watchers registered under the given trigger values, or
    /// every value watcher when the event's values are unknown.
    pub(crate) fn collect_values(
        &self,
        trigger_values: Option<&[String]>,
        buffer: &mut Vec<Arc<CacheWatcher>>,
    ) {
        match trigger_values {
            Some(values) => {
                for value in values {
                    if let Some(map) = self.value_watchers.get(value) {
                        buffer.extend(map.watchers.values().cloned());
                    }
                }
            }
            // Unknown trigger values: deliver to every value watcher
            // rather than risk missing one.
            None => {
                for map in self.value_watchers.values() {
                    buffer.extend(map.watchers.values().cloned());
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.all_watchers
            .values()
            .map(|m| m.watchers.len())
            .sum::<usize>()
            + self
                .value_watchers
                .values()
                .map(|m| m.watchers.len())
                .sum::<usize>()
    }
}

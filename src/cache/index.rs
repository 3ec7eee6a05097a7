use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::object::Object;

/// A named secondary index over the current-state map.
///
/// `keys_fn` maps an object to the index values it should be findable
/// under; a filtered list whose predicate pins one of those values can then
/// skip the full scan.
#[derive(Clone)]
pub struct StoreIndexSpec {
    pub name: String,
    pub keys_fn: Arc<dyn Fn(&Object) -> Vec<String> + Send + Sync>,
}

impl StoreIndexSpec {
    pub fn new(
        name: impl Into<String>,
        keys_fn: impl Fn(&Object) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            keys_fn: Arc::new(keys_fn),
        }
    }
}

impl std::fmt::Debug for StoreIndexSpec {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreIndexSpec").field("name", &self.name).finish()
    }
}

/// Maintained index values: index name → index value → storage keys.
#[derive(Default)]
pub(crate) struct StoreIndexes {
    specs: Vec<StoreIndexSpec>,
    values: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl StoreIndexes {
    pub(crate) fn new(specs: Vec<StoreIndexSpec>) -> Self {
        let values = specs
            .iter()
            .map(|s| (s.name.clone(), HashMap::new()))
            .collect();
        Self { specs, values }
    }

    pub(crate) fn has_index(
        &self,
        name: &str,
    ) -> bool {
        self.specs.iter().any(|s| s.name == name)
    }

    pub(crate) fn insert(
        &mut self,
        obj: &Object,
    ) {
        for spec in &self.specs {
            let by_value = self.values.entry(spec.name.clone()).or_default();
            for value in (spec.keys_fn)(obj) {
                by_value.entry(value).or_default().insert(obj.key.clone());
            }
        }
    }

    pub(crate) fn remove(
        &mut self,
        obj: &Object,
    ) {
        for spec in &self.specs {
            if let Some(by_value) = self.values.get_mut(&spec.name) {
                for value in (spec.keys_fn)(obj) {
                    if let Some(keys) = by_value.get_mut(&value) {
                        keys.remove(&obj.key);
                        if keys.is_empty() {
                            by_value.remove(&value);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn rebuild<'a>(
        &mut self,
        objects: impl Iterator<Item = &'a Object>,
    ) {
        for by_value in self.values.values_mut() {
            by_value.clear();
        }
        for obj in objects {
            self.insert(obj);
        }
    }

    /// Storage keys indexed under (`name`, `value`), if `name` is defined.
    pub(crate) fn lookup(
        &self,
        name: &str,
        value: &str,
    ) -> Option<Vec<String>> {
        if !self.has_index(name) {
            return None;
        }
        let keys = self
            .values
            .get(name)
            .and_then(|by_value| by_value.get(value))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        Some(keys)
    }
}

//! Cached object model and selection predicates
//!
//! Objects are opaque to the cache apart from their metadata: a storage key
//! under the resource prefix, namespace/name, a store-assigned monotone
//! resource version, and label/field attribute sets used for filtering.
//! The payload itself is an encoded blob the cache never inspects.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

/// Attribute set (labels or fields) attached to an object.
pub type AttrSet = BTreeMap<String, String>;

/// Extracts the label and field sets the cache filters on.
///
/// Passed explicitly at construction so the cache never discovers attribute
/// shapes at runtime. The default extractor returns the object's own sets.
pub type AttrsFn = Arc<dyn Fn(&Object) -> (AttrSet, AttrSet) + Send + Sync>;

/// Composed per-watcher filter over (storage key, labels, fields).
pub(crate) type AttrFilter = Arc<dyn Fn(&str, &AttrSet, &AttrSet) -> bool + Send + Sync>;

/// A versioned object as stored under the resource prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Full storage path, e.g. `/registry/widgets/default/a`
    pub key: String,
    pub namespace: String,
    pub name: String,
    /// Store-assigned monotone revision; never reused
    pub resource_version: u64,
    pub labels: AttrSet,
    pub fields: AttrSet,
    /// Encoded body; opaque to the cache
    pub payload: Bytes,
}

impl Object {
    /// Copy of this object with its resource version overwritten.
    ///
    /// Used when delivering events whose revision differs from the
    /// object's own (synthetic initial events, delete events).
    pub(crate) fn at_resource_version(
        &self,
        rv: u64,
    ) -> Object {
        let mut copy = self.clone();
        copy.resource_version = rv;
        copy
    }
}

/// Default attribute extractor: the object's own label and field sets.
pub fn default_attrs_fn() -> AttrsFn {
    Arc::new(|obj: &Object| (obj.labels.clone(), obj.fields.clone()))
}

/// Exact-match selection predicate over labels and fields.
///
/// An empty predicate matches everything. `index_fields` declares which
/// field names the caller considers index-worthy; the cache consults it
/// when inferring trigger values.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    pub labels: AttrSet,
    pub fields: AttrSet,
    pub index_fields: Vec<String>,
}

impl Predicate {
    /// The predicate that selects every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_everything(&self) -> bool {
        self.labels.is_empty() && self.fields.is_empty()
    }

    /// Whether the given attribute sets satisfy every requirement.
    pub fn matches(
        &self,
        labels: &AttrSet,
        fields: &AttrSet,
    ) -> bool {
        self.labels.iter().all(|(k, v)| labels.get(k) == Some(v))
            && self.fields.iter().all(|(k, v)| fields.get(k) == Some(v))
    }

    /// The exact value this predicate requires for `field`, if any.
    pub fn requires_exact_match(
        &self,
        field: &str,
    ) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// First declared index field with an exact-match requirement, usable
    /// to accelerate a filtered list.
    pub fn matcher_index(&self) -> Option<(String, String)> {
        for field in &self.index_fields {
            if let Some(value) = self.requires_exact_match(field) {
                return Some((field.clone(), value.to_string()));
            }
        }
        None
    }
}

/// Whether `key` lies under `prefix` in path terms.
pub(crate) fn has_path_prefix(
    key: &str,
    prefix: &str,
) -> bool {
    if !key.starts_with(prefix) {
        return false;
    }
    // Exact match, prefix already path-terminated, or boundary at a separator.
    key.len() == prefix.len()
        || prefix.ends_with('/')
        || key.as_bytes().get(prefix.len()) == Some(&b'/')
}

/// Compose the key-prefix check with predicate matching into the filter a
/// single watcher or list evaluates per object.
pub(crate) fn filter_with_attrs(
    prefix: String,
    predicate: Predicate,
) -> AttrFilter {
    Arc::new(move |key: &str, labels: &AttrSet, fields: &AttrSet| {
        has_path_prefix(key, &prefix) && predicate.matches(labels, fields)
    })
}

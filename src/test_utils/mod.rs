//! Shared builders for unit tests.

use std::sync::Arc;

use crate::event::CacheEvent;
use crate::event::EventType;
use crate::event::ObjectAttrs;
use crate::event::StoreEvent;
use crate::object::AttrSet;
use crate::object::Object;

/// An object with its name/namespace mirrored into the field set, the way
/// a real attribute extractor would surface them for field selectors.
pub(crate) fn object(
    key: &str,
    namespace: &str,
    name: &str,
    rv: u64,
) -> Object {
    let mut fields = AttrSet::new();
    fields.insert("metadata.namespace".to_string(), namespace.to_string());
    fields.insert("metadata.name".to_string(), name.to_string());
    Object {
        key: key.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        resource_version: rv,
        labels: AttrSet::new(),
        fields,
        payload: Default::default(),
    }
}

pub(crate) fn labeled_object(
    key: &str,
    namespace: &str,
    name: &str,
    rv: u64,
    labels: &[(&str, &str)],
) -> Object {
    let mut obj = object(key, namespace, name, rv);
    obj.labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    obj
}

pub(crate) fn store_event(
    event_type: EventType,
    key: &str,
    namespace: &str,
    name: &str,
    rv: u64,
) -> StoreEvent {
    StoreEvent {
        event_type,
        object: object(key, namespace, name, rv),
        prev_object: None,
    }
}

pub(crate) fn cache_event(
    event_type: EventType,
    key: &str,
    namespace: &str,
    name: &str,
    rv: u64,
) -> CacheEvent {
    let obj = object(key, namespace, name, rv);
    CacheEvent {
        event_type,
        resource_version: rv,
        key: key.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        attrs: ObjectAttrs {
            labels: obj.labels.clone(),
            fields: obj.fields.clone(),
        },
        prev_attrs: None,
        prev_object: None,
        object: Arc::new(obj),
    }
}

/// A cache event whose previous state differs from the current one; used
/// by the selector-transition tests.
pub(crate) fn modified_event(
    key: &str,
    namespace: &str,
    name: &str,
    rv: u64,
    prev_labels: &[(&str, &str)],
    cur_labels: &[(&str, &str)],
) -> CacheEvent {
    let prev = labeled_object(key, namespace, name, rv.saturating_sub(1), prev_labels);
    let cur = labeled_object(key, namespace, name, rv, cur_labels);
    CacheEvent {
        event_type: EventType::Modified,
        resource_version: rv,
        key: key.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        attrs: ObjectAttrs {
            labels: cur.labels.clone(),
            fields: cur.fields.clone(),
        },
        prev_attrs: Some(ObjectAttrs {
            labels: prev.labels.clone(),
            fields: prev.fields.clone(),
        }),
        prev_object: Some(Arc::new(prev)),
        object: Arc::new(cur),
    }
}

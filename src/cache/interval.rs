use std::collections::VecDeque;
use std::sync::Arc;

use crate::event::CacheEvent;
use crate::event::EventType;
use crate::event::ObjectAttrs;
use crate::object::AttrsFn;
use crate::object::Object;

/// Forward-only replay source a new watcher drains before going live.
///
/// Either a slice of the event ring (events above the start revision) or,
/// when the watcher asked for the full initial state, one synthetic `Added`
/// per current-state entry, all stamped with the snapshot revision.
pub(crate) enum CacheInterval {
    Buffered(VecDeque<Arc<CacheEvent>>),
    FromStore {
        objects: VecDeque<Arc<Object>>,
        resource_version: u64,
        get_attrs: AttrsFn,
    },
}

impl std::fmt::Debug for CacheInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheInterval::Buffered(events) => {
                f.debug_tuple("Buffered").field(events).finish()
            }
            CacheInterval::FromStore {
                objects,
                resource_version,
                ..
            } => f
                .debug_struct("FromStore")
                .field("objects", objects)
                .field("resource_version", resource_version)
                .finish(),
        }
    }
}

impl CacheInterval {
    pub(crate) fn next(&mut self) -> Option<Arc<CacheEvent>> {
        match self {
            CacheInterval::Buffered(events) => events.pop_front(),
            CacheInterval::FromStore {
                objects,
                resource_version,
                get_attrs,
            } => {
                let obj = objects.pop_front()?;
                let attrs_fn = get_attrs.clone();
                let (labels, fields) = attrs_fn(&obj);
                Some(Arc::new(CacheEvent {
                    event_type: EventType::Added,
                    prev_object: None,
                    resource_version: *resource_version,
                    key: obj.key.clone(),
                    namespace: obj.namespace.clone(),
                    name: obj.name.clone(),
                    attrs: ObjectAttrs { labels, fields },
                    prev_attrs: None,
                    object: obj,
                }))
            }
        }
    }

    /// Revision the interval was taken at; catch-up delivery resumes live
    /// processing from here.
    pub(crate) fn resource_version(&self) -> u64 {
        match self {
            CacheInterval::Buffered(events) => {
                events.back().map(|e| e.resource_version).unwrap_or(0)
            }
            CacheInterval::FromStore {
                resource_version, ..
            } => *resource_version,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        match self {
            CacheInterval::Buffered(events) => events.len(),
            CacheInterval::FromStore { objects, .. } => objects.len(),
        }
    }
}

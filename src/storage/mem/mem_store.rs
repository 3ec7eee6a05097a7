use std::collections::BTreeMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::errors::StorageError;
use crate::event::EventType;
use crate::event::StoreEvent;
use crate::object::has_path_prefix;
use crate::object::Object;
use crate::storage::BackingStore;
use crate::storage::DecimalVersioner;
use crate::storage::GetOptions;
use crate::storage::ListOptions;
use crate::storage::ListResult;
use crate::storage::StoreWatch;
use crate::storage::UpdateFn;
use crate::storage::Versioner;
use crate::storage::WatchOptions;
use crate::Result;

const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Slack added on top of the replay length when sizing a session channel.
const SESSION_BUFFER_SLACK: usize = 64;

const CONTINUE_TOKEN_PREFIX: &str = "k=";

struct MemSession {
    tx: mpsc::Sender<std::result::Result<StoreEvent, StorageError>>,
    prefix: String,
    progress_notify: bool,
    cancel: CancellationToken,
}

struct MemInner {
    objects: BTreeMap<String, Object>,
    revision: u64,
    history: VecDeque<StoreEvent>,
    /// Oldest revision a watch may still resume from
    history_floor: u64,
    sessions: Vec<MemSession>,
}

/// Versioned in-memory key-value store with resumable watch.
///
/// All mutations run under one async mutex, which also serializes event
/// broadcast, so watch sessions observe every change in revision order.
pub struct MemoryStore {
    inner: Mutex<MemInner>,
    history_capacity: usize,
    versioner: DecimalVersioner,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemInner {
                objects: BTreeMap::new(),
                revision: 0,
                history: VecDeque::new(),
                history_floor: 0,
                sessions: Vec::new(),
            }),
            history_capacity,
            versioner: DecimalVersioner,
        }
    }

    /// Emit a progress bookmark at the current revision to every session
    /// that asked for progress notification.
    pub async fn broadcast_progress_notify(&self) {
        let mut inner = self.inner.lock().await;
        let rv = inner.revision;
        let bookmark = StoreEvent {
            event_type: EventType::Bookmark,
            object: Object {
                resource_version: rv,
                ..Default::default()
            },
            prev_object: None,
        };
        Self::broadcast(&mut inner, bookmark, true).await;
    }

    fn record(
        inner: &mut MemInner,
        event: StoreEvent,
        history_capacity: usize,
    ) {
        if inner.history.len() >= history_capacity {
            if let Some(evicted) = inner.history.pop_front() {
                inner.history_floor = evicted.resource_version();
            }
        }
        inner.history.push_back(event);
    }

    /// Deliver an event to all live sessions, dropping the dead ones.
    /// Runs under the store mutex so deliveries stay in revision order.
    async fn broadcast(
        inner: &mut MemInner,
        event: StoreEvent,
        bookmark_only_sessions: bool,
    ) {
        let mut dead = Vec::new();
        for (idx, session) in inner.sessions.iter().enumerate() {
            if session.cancel.is_cancelled() {
                dead.push(idx);
                continue;
            }
            if bookmark_only_sessions && !session.progress_notify {
                continue;
            }
            if !bookmark_only_sessions && !has_path_prefix(&event.object.key, &session.prefix) {
                continue;
            }
            if session.tx.send(Ok(event.clone())).await.is_err() {
                dead.push(idx);
            }
        }
        for idx in dead.into_iter().rev() {
            inner.sessions.swap_remove(idx);
            trace!("watch session dropped");
        }
    }

    /// Apply one mutation under the store mutex: state update, history
    /// record, and broadcast all happen before the next mutation can start.
    async fn apply(
        inner: &mut MemInner,
        event: StoreEvent,
        history_capacity: usize,
    ) {
        match event.event_type {
            EventType::Added | EventType::Modified => {
                inner
                    .objects
                    .insert(event.object.key.clone(), event.object.clone());
            }
            EventType::Deleted => {
                inner.objects.remove(&event.object.key);
            }
            EventType::Bookmark => {}
        }
        Self::record(inner, event.clone(), history_capacity);
        Self::broadcast(inner, event, false).await;
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(
        &self,
        key: &str,
        _opts: GetOptions,
    ) -> Result<Option<Object>> {
        let inner = self.inner.lock().await;
        Ok(inner.objects.get(key).cloned())
    }

    async fn get_list(
        &self,
        prefix: &str,
        opts: ListOptions,
    ) -> Result<ListResult> {
        let inner = self.inner.lock().await;

        let start_after = match &opts.continue_token {
            Some(token) => Some(
                token
                    .strip_prefix(CONTINUE_TOKEN_PREFIX)
                    .ok_or_else(|| StorageError::InvalidContinueToken(token.clone()))?
                    .to_string(),
            ),
            None => None,
        };

        let mut items = Vec::new();
        let mut continue_token = None;
        for (key, obj) in inner.objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if !has_path_prefix(key, prefix) {
                continue;
            }
            if let Some(after) = &start_after {
                if key.as_str() <= after.as_str() {
                    continue;
                }
            }
            if !opts.predicate.matches(&obj.labels, &obj.fields) {
                continue;
            }
            if opts.limit > 0 && items.len() as u64 == opts.limit {
                continue_token = Some(format!(
                    "{CONTINUE_TOKEN_PREFIX}{}",
                    items
                        .last()
                        .map(|o: &Object| o.key.clone())
                        .unwrap_or_default()
                ));
                break;
            }
            items.push(obj.clone());
        }

        Ok(ListResult {
            items,
            resource_version: inner.revision,
            continue_token,
        })
    }

    async fn watch(
        &self,
        prefix: &str,
        opts: WatchOptions,
    ) -> Result<StoreWatch> {
        let requested = self.versioner.parse(&opts.resource_version)?;

        let mut inner = self.inner.lock().await;
        // rv 0 means "from now"; otherwise resume strictly after `requested`.
        let start = if requested == 0 { inner.revision } else { requested };
        if start < inner.history_floor {
            return Err(StorageError::Compacted {
                requested: start,
                floor: inner.history_floor,
            }
            .into());
        }

        let replay: Vec<StoreEvent> = inner
            .history
            .iter()
            .filter(|e| e.resource_version() > start && has_path_prefix(&e.object.key, prefix))
            .cloned()
            .collect();

        let (tx, rx) = mpsc::channel(replay.len() + SESSION_BUFFER_SLACK);
        for event in replay {
            // Cannot fail: the channel was sized to hold the whole replay.
            let _ = tx.send(Ok(event)).await;
        }

        let cancel = CancellationToken::new();
        inner.sessions.push(MemSession {
            tx,
            prefix: prefix.to_string(),
            progress_notify: opts.progress_notify,
            cancel: cancel.clone(),
        });
        debug!(prefix, start, "watch session opened");

        Ok(StoreWatch::new(rx, cancel))
    }

    async fn count(
        &self,
        prefix: &str,
    ) -> Result<i64> {
        let inner = self.inner.lock().await;
        let count = inner
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| has_path_prefix(key, prefix))
            .count();
        Ok(count as i64)
    }

    async fn create(
        &self,
        mut obj: Object,
    ) -> Result<Object> {
        let mut inner = self.inner.lock().await;
        if inner.objects.contains_key(&obj.key) {
            return Err(StorageError::AlreadyExists(obj.key).into());
        }
        inner.revision += 1;
        let rv = inner.revision;
        self.versioner.update(&mut obj, rv);
        Self::apply(
            &mut inner,
            StoreEvent {
                event_type: EventType::Added,
                object: obj.clone(),
                prev_object: None,
            },
            self.history_capacity,
        )
        .await;
        Ok(obj)
    }

    async fn delete(
        &self,
        key: &str,
        _current_hint: Option<Object>,
    ) -> Result<Object> {
        let mut inner = self.inner.lock().await;
        let prev = match inner.objects.get(key) {
            Some(obj) => obj.clone(),
            None => {
                return Err(StorageError::KeyNotFound {
                    key: key.to_string(),
                    revision: inner.revision,
                }
                .into())
            }
        };
        inner.revision += 1;
        let deleted = prev.at_resource_version(inner.revision);
        Self::apply(
            &mut inner,
            StoreEvent {
                event_type: EventType::Deleted,
                object: deleted.clone(),
                prev_object: Some(prev),
            },
            self.history_capacity,
        )
        .await;
        Ok(deleted)
    }

    async fn guaranteed_update(
        &self,
        key: &str,
        update: UpdateFn,
        _current_hint: Option<Object>,
    ) -> Result<Object> {
        let mut inner = self.inner.lock().await;
        let current = inner.objects.get(key).cloned();
        let mut desired = update(current.as_ref())?;
        desired.key = key.to_string();

        inner.revision += 1;
        let rv = inner.revision;
        self.versioner.update(&mut desired, rv);
        let event_type = if current.is_some() {
            EventType::Modified
        } else {
            EventType::Added
        };
        Self::apply(
            &mut inner,
            StoreEvent {
                event_type,
                object: desired.clone(),
                prev_object: current,
            },
            self.history_capacity,
        )
        .await;
        Ok(desired)
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn revision(&self) -> u64 {
        self.inner.lock().await.revision
    }

    /// Sever every watch session, as an unreachable store would.
    pub async fn drop_watch_sessions(&self) {
        self.inner.lock().await.sessions.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.objects.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

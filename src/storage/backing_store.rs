use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::CacheError;
use crate::event::StoreEvent;
use crate::object::Object;
use crate::object::Predicate;
use crate::Result;

/// Parses and stamps resource versions.
///
/// The store is the sole authority on revision numbers; the cache only
/// needs to translate the request wire form into integers and to overwrite
/// the version on objects it copies for delivery.
pub trait Versioner: Send + Sync + 'static {
    /// Parse a request resource version. The empty string parses to 0.
    fn parse(
        &self,
        rv: &str,
    ) -> Result<u64>;

    /// Overwrite the version on an object copy.
    fn update(
        &self,
        obj: &mut Object,
        rv: u64,
    );
}

/// Versioner for stores that expose revisions as decimal strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecimalVersioner;

impl Versioner for DecimalVersioner {
    fn parse(
        &self,
        rv: &str,
    ) -> Result<u64> {
        if rv.is_empty() {
            return Ok(0);
        }
        rv.parse::<u64>()
            .map_err(|_| CacheError::InvalidResourceVersion(rv.to_string()).into())
    }

    fn update(
        &self,
        obj: &mut Object,
        rv: u64,
    ) {
        obj.resource_version = rv;
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Minimum freshness; empty means "freshest available"
    pub resource_version: String,
    /// Return `Ok(None)` instead of a not-found error
    pub ignore_not_found: bool,
}

/// How a requested resource version constrains a list read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionMatch {
    #[default]
    Unset,
    /// Serve at a revision at least as fresh as requested
    NotOlderThan,
    /// Serve at exactly the requested revision; the cache cannot do this
    Exact,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub resource_version: String,
    pub version_match: VersionMatch,
    pub predicate: Predicate,
    /// 0 means no limit
    pub limit: u64,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<Object>,
    /// Revision the list was taken at
    pub resource_version: u64,
    /// Present when the list was truncated by `limit`
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Deliver events with revision strictly greater than this
    pub resource_version: String,
    pub predicate: Predicate,
    pub allow_bookmarks: bool,
    /// None: plain watch. Some(true): synthetic initial state then live.
    /// Some(false): live from the resolved start revision.
    pub send_initial_events: Option<bool>,
    /// Ask the store for periodic progress bookmarks
    pub progress_notify: bool,
    /// Cut the watch after this long; a final bookmark is attempted first
    pub timeout: Option<std::time::Duration>,
}

/// A live watch session against the backing store.
///
/// Stream errors (compaction, disconnect) arrive in-band; the channel
/// closing without an error means the store ended the stream.
#[derive(Debug)]
pub struct StoreWatch {
    pub events: mpsc::Receiver<std::result::Result<StoreEvent, crate::errors::StorageError>>,
    cancel: CancellationToken,
}

impl StoreWatch {
    pub fn new(
        events: mpsc::Receiver<std::result::Result<StoreEvent, crate::errors::StorageError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { events, cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StoreWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Compare-and-swap update closure: receives the current value (None if the
/// key is absent) and produces the desired new value.
pub type UpdateFn = Box<dyn Fn(Option<&Object>) -> Result<Object> + Send + Sync>;

/// The surface of the strongly-consistent store the cache delegates to.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
        opts: GetOptions,
    ) -> Result<Option<Object>>;

    /// Paginated list of every object under `prefix`.
    async fn get_list(
        &self,
        prefix: &str,
        opts: ListOptions,
    ) -> Result<ListResult>;

    /// Watch for changes under `prefix`, resumable from a revision.
    async fn watch(
        &self,
        prefix: &str,
        opts: WatchOptions,
    ) -> Result<StoreWatch>;

    async fn count(
        &self,
        prefix: &str,
    ) -> Result<i64>;

    async fn create(
        &self,
        obj: Object,
    ) -> Result<Object>;

    /// Delete `key`, using `current_hint` (the cache's view) as the
    /// optimistic base value when present.
    async fn delete(
        &self,
        key: &str,
        current_hint: Option<Object>,
    ) -> Result<Object>;

    /// Compare-and-swap update of `key`, retried by the store on conflict.
    async fn guaranteed_update(
        &self,
        key: &str,
        update: UpdateFn,
        current_hint: Option<Object>,
    ) -> Result<Object>;
}

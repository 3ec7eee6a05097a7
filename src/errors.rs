//! Error hierarchy for the watch-and-list cache
//!
//! Errors are split by concern: cache-side failures (readiness, freshness,
//! watch-window misses) and backing-store failures, which are propagated
//! unchanged. Structural problems are reported at construction; per-request
//! problems are returned to the caller; failures on an accepted watch are
//! delivered in-band as an `Error` event on the watch channel.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failures originating in the cache itself
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Failures from the delegated backing store, propagated unchanged
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The readiness gate was cancelled or permanently stopped
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The requested resource version precedes the oldest retained event
    #[error("Too old resource version: {requested} (oldest retained: {oldest})")]
    TooOldResourceVersion { requested: u64, oldest: u64 },

    /// The cache did not reach the requested freshness in time
    #[error("Timed out waiting for resource version {requested} (current: {current})")]
    FreshnessTimeout { requested: u64, current: u64 },

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// The watcher could not keep up and was closed by the dispatcher
    #[error("Watcher forced to close: {0}")]
    ForcedClose(String),

    /// Codec self-check failed at construction
    #[error("Storage codec does not match the cached type: {0}")]
    CodecMismatch(String),

    /// A resource version string could not be parsed
    #[error("Invalid resource version: {0:?}")]
    InvalidResourceVersion(String),

    /// More than one trigger index was declared for the resource
    #[error("At most one trigger index is supported, got {0}")]
    TooManyTriggerIndexes(usize),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Key absent at the revision the read was served at
    #[error("Key {key:?} not found at revision {revision}")]
    KeyNotFound { key: String, revision: u64 },

    /// Create of a key that already exists
    #[error("Key {0:?} already exists")]
    AlreadyExists(String),

    /// Watch resumption below the store's retained window
    #[error("Requested revision {requested} has been compacted (floor: {floor})")]
    Compacted { requested: u64, floor: u64 },

    /// Malformed pagination token
    #[error("Invalid continue token: {0:?}")]
    InvalidContinueToken(String),

    /// The store watch stream ended or the store became unreachable
    #[error("Backing store disconnected: {0}")]
    Disconnected(String),

    /// Any other backing store failure
    #[error("Backing store error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is the watch-window miss that watch/list callers are
    /// expected to recover from by re-listing.
    pub fn is_too_old(&self) -> bool {
        matches!(self, Error::Cache(CacheError::TooOldResourceVersion { .. }))
    }
}

use std::time::Duration;

/// Initial capacity of the event ring before any adaptation.
pub(crate) const DEFAULT_RING_CAPACITY: usize = 100;

/// Hard ceiling for the adaptive event ring.
pub(crate) const RING_CAPACITY_CEILING: usize = 100 * 1024;

/// Target length of the history window the ring should cover. If the ring
/// overflows while its oldest event is younger than this, the capacity is
/// doubled instead of evicting.
pub(crate) const DEFAULT_EVENT_FRESH_WINDOW: Duration = Duration::from_secs(75);

/// Capacity of the channel between the watch cache and the dispatcher.
pub(crate) const DEFAULT_INCOMING_BUFFER: usize = 100;

/// How often a proactive bookmark is scheduled per watcher, in addition to
/// the one sent right before the watcher's deadline.
pub(crate) const DEFAULT_BOOKMARK_FREQUENCY: Duration = Duration::from_secs(60);

/// Base period of the dispatcher's bookmark tick.
pub(crate) const BOOKMARK_TICK: Duration = Duration::from_secs(1);

/// Jitter factor applied to the bookmark tick.
pub(crate) const BOOKMARK_TICK_JITTER: f64 = 0.25;

/// How long before a watcher's deadline its final bookmark is scheduled.
pub(crate) const DEADLINE_BOOKMARK_MARGIN: Duration = Duration::from_secs(1);

/// Ceiling of the accumulated dispatch time budget.
pub(crate) const DEFAULT_BUDGET_CAP: Duration = Duration::from_millis(100);

/// Budget replenishment granted by a dispatch with no blocked watchers.
pub(crate) const DEFAULT_BUDGET_REFRESH: Duration = Duration::from_millis(10);

/// Page size for the reflector's initial and re-sync lists.
pub(crate) const DEFAULT_LIST_PAGE_SIZE: u64 = 10_000;

/// Upper bound on a freshness wait before the request is failed.
pub(crate) const DEFAULT_FRESHNESS_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-watcher input buffer when the trigger index narrows the fan-out.
pub(crate) const CHANNEL_SIZE_TRIGGER_SUPPORTED: usize = 16;

/// Per-watcher input buffer when a trigger index exists but this watcher
/// cannot use it and therefore sees the full event rate.
pub(crate) const CHANNEL_SIZE_TRIGGER_UNSUPPORTED: usize = 1024;

/// Per-watcher input buffer when no trigger index is configured.
pub(crate) const CHANNEL_SIZE_NO_TRIGGER: usize = 128;

/// Capacity of the client-facing watch event channel.
pub(crate) const WATCH_OUTPUT_BUFFER: usize = 10;

/// Initial backoff after the reflector loses its connection to the store.
pub(crate) const DEFAULT_RELIST_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Backoff ceiling for reflector reconnects.
pub(crate) const DEFAULT_RELIST_BACKOFF_MAX: Duration = Duration::from_secs(30);

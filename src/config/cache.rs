use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::*;
use crate::Result;

/// Tuning parameters for one cache instance.
///
/// Every field has a sensible default; loading an empty TOML table yields
/// the same configuration as [`CacheConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Initial capacity of the event ring
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Hard ceiling the adaptive ring may grow to
    #[serde(default = "default_ring_capacity_ceiling")]
    pub ring_capacity_ceiling: usize,

    /// Target history window; the ring grows while it covers less than this
    #[serde(default = "default_event_fresh_window_ms")]
    pub event_fresh_window_ms: u64,

    /// Capacity of the watch-cache → dispatcher channel
    #[serde(default = "default_incoming_buffer")]
    pub incoming_buffer: usize,

    /// Proactive bookmark frequency per watcher
    #[serde(default = "default_bookmark_frequency_ms")]
    pub bookmark_frequency_ms: u64,

    /// Ceiling of the accumulated dispatch time budget
    #[serde(default = "default_budget_cap_ms")]
    pub dispatch_budget_cap_ms: u64,

    /// Budget granted back by a dispatch with no blocked watchers
    #[serde(default = "default_budget_refresh_ms")]
    pub dispatch_budget_refresh_ms: u64,

    /// Page size for the reflector's initial and re-sync lists
    #[serde(default = "default_list_page_size")]
    pub list_page_size: u64,

    /// Upper bound on a freshness wait before the request fails
    #[serde(default = "default_freshness_wait_timeout_ms")]
    pub freshness_wait_timeout_ms: u64,

    /// Initial backoff after the reflector loses the store connection
    #[serde(default = "default_relist_backoff_initial_ms")]
    pub relist_backoff_initial_ms: u64,

    /// Backoff ceiling for reflector reconnects
    #[serde(default = "default_relist_backoff_max_ms")]
    pub relist_backoff_max_ms: u64,
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_ring_capacity_ceiling() -> usize {
    RING_CAPACITY_CEILING
}

fn default_event_fresh_window_ms() -> u64 {
    DEFAULT_EVENT_FRESH_WINDOW.as_millis() as u64
}

fn default_incoming_buffer() -> usize {
    DEFAULT_INCOMING_BUFFER
}

fn default_bookmark_frequency_ms() -> u64 {
    DEFAULT_BOOKMARK_FREQUENCY.as_millis() as u64
}

fn default_budget_cap_ms() -> u64 {
    DEFAULT_BUDGET_CAP.as_millis() as u64
}

fn default_budget_refresh_ms() -> u64 {
    DEFAULT_BUDGET_REFRESH.as_millis() as u64
}

fn default_list_page_size() -> u64 {
    DEFAULT_LIST_PAGE_SIZE
}

fn default_freshness_wait_timeout_ms() -> u64 {
    DEFAULT_FRESHNESS_WAIT_TIMEOUT.as_millis() as u64
}

fn default_relist_backoff_initial_ms() -> u64 {
    DEFAULT_RELIST_BACKOFF_INITIAL.as_millis() as u64
}

fn default_relist_backoff_max_ms() -> u64 {
    DEFAULT_RELIST_BACKOFF_MAX.as_millis() as u64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            ring_capacity_ceiling: default_ring_capacity_ceiling(),
            event_fresh_window_ms: default_event_fresh_window_ms(),
            incoming_buffer: default_incoming_buffer(),
            bookmark_frequency_ms: default_bookmark_frequency_ms(),
            dispatch_budget_cap_ms: default_budget_cap_ms(),
            dispatch_budget_refresh_ms: default_budget_refresh_ms(),
            list_page_size: default_list_page_size(),
            freshness_wait_timeout_ms: default_freshness_wait_timeout_ms(),
            relist_backoff_initial_ms: default_relist_backoff_initial_ms(),
            relist_backoff_max_ms: default_relist_backoff_max_ms(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 {
            return Err(ConfigError::Message("ring_capacity must be positive".into()).into());
        }
        if self.ring_capacity_ceiling < self.ring_capacity {
            return Err(ConfigError::Message(
                "ring_capacity_ceiling must be >= ring_capacity".into(),
            )
            .into());
        }
        if self.incoming_buffer == 0 {
            return Err(ConfigError::Message("incoming_buffer must be positive".into()).into());
        }
        if self.list_page_size == 0 {
            return Err(ConfigError::Message("list_page_size must be positive".into()).into());
        }
        if self.dispatch_budget_refresh_ms > self.dispatch_budget_cap_ms {
            return Err(ConfigError::Message(
                "dispatch_budget_refresh_ms must not exceed dispatch_budget_cap_ms".into(),
            )
            .into());
        }
        if self.relist_backoff_initial_ms == 0
            || self.relist_backoff_max_ms < self.relist_backoff_initial_ms
        {
            return Err(ConfigError::Message(
                "relist backoff must be positive and capped above its initial value".into(),
            )
            .into());
        }
        Ok(())
    }

    pub fn event_fresh_window(&self) -> Duration {
        Duration::from_millis(self.event_fresh_window_ms)
    }

    pub fn bookmark_frequency(&self) -> Duration {
        Duration::from_millis(self.bookmark_frequency_ms)
    }

    pub fn dispatch_budget_cap(&self) -> Duration {
        Duration::from_millis(self.dispatch_budget_cap_ms)
    }

    pub fn dispatch_budget_refresh(&self) -> Duration {
        Duration::from_millis(self.dispatch_budget_refresh_ms)
    }

    pub fn freshness_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.freshness_wait_timeout_ms)
    }

    pub fn relist_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.relist_backoff_initial_ms)
    }

    pub fn relist_backoff_max(&self) -> Duration {
        Duration::from_millis(self.relist_backoff_max_ms)
    }
}

//! # d-cache
//!
//! A watch-and-list cache that fronts a strongly-consistent, versioned
//! key-value store. One background reflector performs a paginated list and
//! then a continuous watch against the store, keeping a sliding window of
//! recent revisions in memory; clients read and watch against that window
//! while the store sees a single consumer.
//!
//! ## Features
//! - **Freshness-bounded reads**: Get/List block until the cache has
//!   assimilated the requested revision, never serving staler data
//! - **Watch fan-out**: one dispatcher delivers each event to the
//!   interested watchers under a bounded time budget
//! - **Trigger index**: exact-match watchers narrow fan-out from all
//!   watchers to the watchers registered under one value
//! - **Bookmarks**: synthetic progress events for cheap watch resumption
//! - **Pass-through writes**: create/delete/compare-and-swap delegate to
//!   the store with the cached object as the optimistic base value
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//!
//! use d_cache::{Cacher, CacherConfig, MemoryStore, WatchOptions};
//!
//! #[tokio::main]
//! async fn main() -> d_cache::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let cacher = Cacher::from_config(CacherConfig::new(
//!         store,
//!         "widgets",
//!         "/registry/widgets",
//!     ))?;
//!
//!     let mut watch = cacher
//!         .watch("/registry/widgets", WatchOptions {
//!             resource_version: "0".to_string(),
//!             ..Default::default()
//!         })
//!         .await?;
//!     while let Some(event) = watch.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod storage;

mod cache;
mod constants;
mod dispatch;
mod errors;
mod event;
mod object;
mod ready;
mod reflector;
mod utils;

pub use cache::StoreIndexSpec;
pub use dispatch::Cacher;
pub use dispatch::CacherConfig;
pub use dispatch::IndexedTrigger;
pub use dispatch::WatchEventStream;
pub use dispatch::WatchHandle;
pub use errors::CacheError;
pub use errors::Error;
pub use errors::Result;
pub use errors::StorageError;
pub use event::EventType;
pub use event::StoreEvent;
pub use event::WatchEvent;
pub use object::default_attrs_fn;
pub use object::AttrSet;
pub use object::AttrsFn;
pub use object::Object;
pub use object::Predicate;
pub use storage::mem::MemoryStore;
pub use storage::BackingStore;
pub use storage::Codec;
pub use storage::DecimalVersioner;
pub use storage::GetOptions;
pub use storage::ListOptions;
pub use storage::ListResult;
pub use storage::StoreWatch;
pub use storage::UpdateFn;
pub use storage::VersionMatch;
pub use storage::Versioner;
pub use storage::WatchOptions;

//-----------------------------------------------------------
// Test utils
#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod ready_test;

//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;

#[doc(hidden)]
pub(crate) const API_SLO: Objective = Objective::new("cache_api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);

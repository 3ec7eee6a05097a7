//! In-memory backing store
//!
//! A complete, revisioned implementation of [`crate::BackingStore`] used by
//! the test suite and by embedders that want a cache without an external
//! store. Revisions are assigned from a single counter; a bounded event
//! history makes watches resumable until the history is compacted away.

mod mem_store;


pub use mem_store::MemoryStore;

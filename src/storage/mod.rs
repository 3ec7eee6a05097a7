//! Backing store contract
//!
//! The cache consumes a small surface of the strongly-consistent store it
//! fronts: point reads, paginated prefix lists, a watch stream resumable
//! from a revision, and the pass-through mutations. Everything durable and
//! authoritative lives behind [`BackingStore`]; the cache never assigns
//! revisions itself.

mod backing_store;
mod codec;
pub mod mem;


pub use backing_store::BackingStore;
pub use backing_store::DecimalVersioner;
pub use backing_store::GetOptions;
pub use backing_store::ListOptions;
pub use backing_store::ListResult;
pub use backing_store::StoreWatch;
pub use backing_store::UpdateFn;
pub use backing_store::VersionMatch;
pub use backing_store::Versioner;
pub use backing_store::WatchOptions;
pub use codec::check_codec;
pub use codec::BincodeCodec;
pub use codec::Codec;

#[cfg(test)]
pub use backing_store::MockBackingStore;

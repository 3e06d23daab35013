//! Client-side caches.
//!
//! Two independent caches live here:
//!
//! - [`ReadThroughCache`]: HTTP response cache keyed by request identity, with
//!   TTL expiry and two tiers (in-process memory over a [`DurableStore`]).
//! - [`QueryCache`]: UI-facing named collections that the realtime
//!   synchronizer patches in place, with in-flight mutation tracking so an
//!   inbound event cannot undo an optimistic local write.

pub mod durable;
pub mod key;
pub mod lmdb;
pub mod query;
pub mod read_through;

pub use durable::{CacheFault, DurableStore, MemoryStore};
pub use key::{cache_key, is_cacheable_method};
pub use lmdb::LmdbStore;
pub use query::{MutationGuard, PatchOptions, PatchOutcome, QueryCache, QueryKey};
pub use read_through::{durable_key, CacheStats, ReadThroughCache};

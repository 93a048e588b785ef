//! Offline-aware data cache.
//!
//! This module provides the caching engine between callers and the remote
//! backend:
//! - Two tiers: a process-lifetime memory cache over a durable SQLite store
//! - Per-call consistency strategies (cache-first, network-first, stale-while-revalidate)
//! - Deduplication of concurrent fetches for the same key
//! - Optimistic mutations with rollback by namespace eviction

mod dedup;
mod key;
mod layer;
mod memory;
mod optimistic;
mod storage;
mod traits;

pub use dedup::PendingRequests;
pub use key::{CacheKey, Namespace, Operation, Period};
pub use layer::CacheLayer;
pub use memory::MemoryCache;
pub use optimistic::{is_temp_id, Mutation, MutationKind, TempIds};
pub use storage::{default_db_path, NoopStorage, PersistentStore, SqliteStorage};
pub use traits::{
  default_stale_time, is_stale, CacheEntry, CacheResult, CacheSource, Cacheable, FetchOptions,
  Strategy,
};

//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::dedup::PendingRequests;
use super::memory::MemoryCache;
use super::optimistic::{Mutation, TempIds};
use super::storage::PersistentStore;
use super::traits::{
  default_stale_time, is_stale, CacheEntry, CacheResult, Cacheable, FetchOptions, Strategy,
};
use crate::connectivity::Connectivity;
use crate::error::{Error, Result};

/// A cached value decoded into the caller's type.
struct Cached<T> {
  data: T,
  stored_at: chrono::DateTime<Utc>,
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the remote backend,
/// providing transparent caching with offline support. Reads resolve through
/// the memory cache, then the persistent store, then the network.
pub struct CacheLayer<S: PersistentStore> {
  memory: Arc<MemoryCache>,
  storage: Arc<S>,
  pending: Arc<PendingRequests>,
  connectivity: Connectivity,
  /// Serializes optimistic rewrites of namespace entries
  mutations: Arc<Mutex<()>>,
  temp_ids: Arc<TempIds>,
  /// Stale time used by `FetchOptions` built through `options`
  stale_time: Duration,
}

impl<S: PersistentStore + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, connectivity: Connectivity) -> Self {
    Self {
      memory: Arc::new(MemoryCache::new()),
      storage: Arc::new(storage),
      pending: Arc::new(PendingRequests::new()),
      connectivity,
      mutations: Arc::new(Mutex::new(())),
      temp_ids: Arc::new(TempIds::new()),
      stale_time: default_stale_time(),
    }
  }

  /// Set the default stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Options for `strategy` using this layer's default stale time.
  pub fn options(&self, strategy: Strategy) -> FetchOptions {
    FetchOptions::new(strategy).with_stale_time(self.stale_time)
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  pub fn memory(&self) -> &MemoryCache {
    &self.memory
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub(crate) fn next_temp_id(&self) -> i64 {
    self.temp_ids.next()
  }

  /// Fetch `key` according to `options`, returning only the data.
  pub async fn fetch_with_cache<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
    options: FetchOptions,
  ) -> Result<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Ok(self.fetch_with_cache_result(key, fetcher, options).await?.data)
  }

  /// Fetch `key` according to `options`.
  ///
  /// - `CacheFirst` with a cached entry returns it immediately; a stale entry
  ///   is refreshed in the background while online.
  /// - `NetworkFirst` and `StaleWhileRevalidate` fetch while online, falling
  ///   back to the cached entry when the fetch fails.
  /// - Offline reads serve the cached entry or fail with `NoCachedData`.
  /// - `force_refresh` skips cache reads while online. Offline it serves the
  ///   cached entry, failing with `Offline` when there is none.
  pub async fn fetch_with_cache_result<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
    options: FetchOptions,
  ) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    self.resolve(key, fetcher, options, accept_any).await
  }

  /// `fetch_with_cache_result` where cached values must also pass `accept`.
  async fn resolve<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
    options: FetchOptions,
    accept: fn(&Value) -> bool,
  ) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    validate_key(key)?;
    let online = self.is_online();

    if options.force_refresh {
      if !online {
        return match self.read_cached::<T>(key, accept) {
          Some(cached) => {
            debug!(key, "offline, serving cache instead of refreshing");
            Ok(CacheResult::offline(cached.data, cached.stored_at))
          }
          None => Err(Error::offline("refresh data")),
        };
      }
      let data = fetcher().await?;
      self.store(key, &data);
      return Ok(CacheResult::from_network(data));
    }

    let cached = self.read_cached::<T>(key, accept);

    if options.strategy == Strategy::CacheFirst {
      if let Some(cached) = cached {
        let stale = is_stale(cached.stored_at, Utc::now(), options.stale_time);
        if online && stale {
          self.spawn_refresh(key, fetcher);
        }
        debug!(key, stale, "cache-first hit");
        return Ok(CacheResult::from_cache(cached.data, cached.stored_at, stale));
      }
      debug!(key, "cache-first miss, going to network");
      return self.network_or_fallback(key, fetcher, None, online).await;
    }

    self.network_or_fallback(key, fetcher, cached, online).await
  }

  async fn network_or_fallback<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
    cached: Option<Cached<T>>,
    online: bool,
  ) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if !online {
      return match cached {
        Some(cached) => {
          debug!(key, "offline, serving cache");
          Ok(CacheResult::offline(cached.data, cached.stored_at))
        }
        None => Err(Error::NoCachedData {
          key: key.to_string(),
        }),
      };
    }

    match fetcher().await {
      Ok(data) => {
        self.store(key, &data);
        Ok(CacheResult::from_network(data))
      }
      Err(err) => match cached {
        Some(cached) => {
          warn!(key, error = %err, "fetch failed, serving cached data");
          Ok(CacheResult::from_cache(cached.data, cached.stored_at, true))
        }
        None => Err(err),
      },
    }
  }

  /// Fire-and-forget refresh; failures are dropped.
  fn spawn_refresh<T, F, Fut>(&self, key: &str, fetcher: F)
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let layer = self.clone();
    let key = key.to_string();
    tokio::spawn(async move {
      match fetcher().await {
        Ok(data) => layer.store(&key, &data),
        Err(err) => debug!(key, error = %err, "background refresh failed"),
      }
    });
  }

  /// Deduplicated fetch.
  ///
  /// A fresh memory-cache hit returns straight away. Otherwise concurrent
  /// callers for the same key share a single `fetch_with_cache` run and all
  /// observe its outcome.
  pub async fn batch_request<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
    options: FetchOptions,
  ) -> Result<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    validate_key(key)?;

    if !options.force_refresh {
      if let Some(entry) = self.memory.get(key) {
        if !entry.is_stale_at(Utc::now(), options.stale_time) {
          if let Ok(data) = serde_json::from_value::<T>(entry.value) {
            debug!(key, "memory hit");
            return Ok(data);
          }
        }
      }
    }

    let shared = self.pending.join_or_start(key, || {
      let layer = self.clone();
      let owned_key = key.to_string();
      async move {
        let fetch_value = move || async move {
          let data = fetcher().await?;
          to_value(&data)
        };
        layer
          .resolve::<Value, _, _>(&owned_key, fetch_value, options, decodes_as::<T>)
          .await
          .map(|result| result.data)
      }
    });

    let value = shared.await?;
    serde_json::from_value(value).map_err(|e| Error::Decode {
      key: key.to_string(),
      message: e.to_string(),
    })
  }

  /// Run several keyed fetches concurrently.
  ///
  /// Failures do not fail the batch: the key maps to `None` and a warning is
  /// logged.
  pub async fn batch_fetch<F, Fut>(
    &self,
    queries: Vec<(String, F, FetchOptions)>,
  ) -> BTreeMap<String, Option<Value>>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    let fetches = queries.into_iter().map(|(key, fetcher, options)| async move {
      let result = self.fetch_with_cache::<Value, _, _>(&key, fetcher, options).await;
      (key, result)
    });

    join_all(fetches)
      .await
      .into_iter()
      .map(|(key, result)| match result {
        Ok(value) => (key, Some(value)),
        Err(err) => {
          warn!(key, error = %err, "batch fetch failed");
          (key, None)
        }
      })
      .collect()
  }

  /// Refresh `key` from the network, ignoring any failure.
  pub async fn prefetch<T, F, Fut>(&self, key: &str, fetcher: F, options: FetchOptions)
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if let Err(err) = self
      .fetch_with_cache(key, fetcher, options.force_refresh())
      .await
    {
      debug!(key, error = %err, "prefetch failed");
    }
  }

  /// Apply `mutation` optimistically around `request`.
  ///
  /// Offline calls fail before touching the cache. On success the mutation is
  /// committed with the confirmed record; on failure it is rolled back and
  /// the failure is returned unchanged.
  pub async fn mutate<T, F, Fut>(&self, mutation: Mutation, request: F) -> Result<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if !self.is_online() {
      return Err(Error::offline(mutation.verb()));
    }

    {
      let _guard = self.lock_mutations();
      mutation.apply(self);
    }

    match request().await {
      Ok(confirmed) => {
        let record = serde_json::to_value(&confirmed).unwrap_or_else(|e| {
          warn!(namespace = %mutation.namespace, error = %e, "failed to encode confirmed record");
          Value::Null
        });
        let _guard = self.lock_mutations();
        mutation.commit(self, &record);
        Ok(confirmed)
      }
      Err(err) => {
        warn!(namespace = %mutation.namespace, error = %err, "mutation failed, rolling back");
        let _guard = self.lock_mutations();
        mutation.rollback(self);
        Err(err)
      }
    }
  }

  fn lock_mutations(&self) -> std::sync::MutexGuard<'_, ()> {
    self
      .mutations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Read `key` from memory, then the persistent store.
  ///
  /// Entries that fail `accept` or no longer decode as `T` count as misses.
  fn read_cached<T: Cacheable>(&self, key: &str, accept: fn(&Value) -> bool) -> Option<Cached<T>> {
    let entry = self.read_entry(key)?;
    if !accept(&entry.value) {
      debug!(key, "cached entry has unexpected shape, ignoring");
      return None;
    }
    match serde_json::from_value::<T>(entry.value) {
      Ok(data) => Some(Cached {
        data,
        stored_at: entry.stored_at,
      }),
      Err(e) => {
        debug!(key, error = %e, "cached entry has unexpected shape, ignoring");
        None
      }
    }
  }

  /// Raw entry lookup. Persistent hits are promoted into memory.
  pub fn read_entry(&self, key: &str) -> Option<CacheEntry> {
    if let Some(entry) = self.memory.get(key) {
      return Some(entry);
    }

    match self.storage.get(key) {
      Ok(Some(entry)) => {
        self.memory.set(entry.clone());
        Some(entry)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key, error = %e, "failed to read persistent cache");
        None
      }
    }
  }

  /// Write `data` under `key` with the current timestamp.
  fn store<T: Cacheable>(&self, key: &str, data: &T) {
    match serde_json::to_value(data) {
      Ok(value) => self.write_entry(CacheEntry::new(key, value)),
      Err(e) => warn!(key, error = %e, "failed to serialize data for cache"),
    }
  }

  /// Write an entry through memory and the persistent store.
  pub fn write_entry(&self, entry: CacheEntry) {
    if let Err(e) = self.storage.set(&entry.key, &entry) {
      warn!(key = %entry.key, error = %e, "failed to save to persistent cache");
    }
    self.memory.set(entry);
  }

  /// Remove one key from both tiers.
  pub fn remove_entry(&self, key: &str) {
    self.memory.remove(key);
    if let Err(e) = self.storage.remove(key) {
      warn!(key, error = %e, "failed to remove persistent cache entry");
    }
  }

  /// Keys under `prefix` in either tier.
  pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
    let mut keys: BTreeSet<String> = self.memory.keys_with_prefix(prefix).into_iter().collect();
    match self.storage.keys_with_prefix(prefix) {
      Ok(stored) => keys.extend(stored),
      Err(e) => warn!(prefix, error = %e, "failed to list persistent cache keys"),
    }
    keys.into_iter().collect()
  }

  /// Evict every entry whose key starts with `prefix`.
  pub fn invalidate_prefix(&self, prefix: &str) {
    let keys = self.keys_with_prefix(prefix);
    debug!(prefix, count = keys.len(), "invalidating cache prefix");
    for key in keys {
      self.remove_entry(&key);
    }
  }

  /// Remove one key, or every data-namespace key when `key` is `None`.
  pub fn clear_cache(&self, key: Option<&str>) {
    match key {
      Some(key) => self.remove_entry(key),
      None => {
        for namespace in crate::cache::Namespace::ALL {
          self.invalidate_prefix(&namespace.prefix());
        }
      }
    }
  }
}

impl<S: PersistentStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      memory: Arc::clone(&self.memory),
      storage: Arc::clone(&self.storage),
      pending: Arc::clone(&self.pending),
      connectivity: self.connectivity.clone(),
      mutations: Arc::clone(&self.mutations),
      temp_ids: Arc::clone(&self.temp_ids),
      stale_time: self.stale_time,
    }
  }
}

fn validate_key(key: &str) -> Result<()> {
  if key.trim().is_empty() {
    return Err(Error::InvalidKey(key.to_string()));
  }
  Ok(())
}

fn accept_any(_: &Value) -> bool {
  true
}

/// Whether `value` decodes as `T`.
fn decodes_as<T: Cacheable>(value: &Value) -> bool {
  T::deserialize(value).is_ok()
}

fn to_value<T: Cacheable>(data: &T) -> Result<Value> {
  serde_json::to_value(data).map_err(|e| Error::Internal(format!("failed to encode data: {}", e)))
}

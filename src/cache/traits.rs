//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Values that can flow through the cache.
///
/// Everything is stored as JSON, so any owned serde type qualifies.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A single cached value with its write timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  /// Set when the entry is written; only a write changes it
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Create an entry stamped with the current time.
  pub fn new(key: impl Into<String>, value: Value) -> Self {
    Self::at(key, value, Utc::now())
  }

  pub fn at(key: impl Into<String>, value: Value, stored_at: DateTime<Utc>) -> Self {
    Self {
      key: key.into(),
      value,
      stored_at,
    }
  }

  /// Age-based staleness relative to `now`.
  pub fn is_stale_at(&self, now: DateTime<Utc>, stale_time: Duration) -> bool {
    is_stale(self.stored_at, now, stale_time)
  }
}

/// An entry is stale once its age reaches `stale_time` (inclusive boundary).
pub fn is_stale(stored_at: DateTime<Utc>, now: DateTime<Utc>, stale_time: Duration) -> bool {
  now - stored_at >= stale_time
}

/// How a read reconciles the cache with the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Return cache immediately, refresh in the background when stale
  CacheFirst,
  /// Try network, fall back to cache on failure
  NetworkFirst,
  /// Handled like `NetworkFirst`: network attempt first, cached value as fallback
  #[default]
  StaleWhileRevalidate,
}

/// Per-call options for `CacheLayer::fetch_with_cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
  pub strategy: Strategy,
  pub stale_time: Duration,
  /// Skip cache reads entirely
  pub force_refresh: bool,
}

/// Default stale time used when a call does not specify one.
pub fn default_stale_time() -> Duration {
  Duration::minutes(5)
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      strategy: Strategy::default(),
      stale_time: default_stale_time(),
      force_refresh: false,
    }
  }
}

impl FetchOptions {
  pub fn new(strategy: Strategy) -> Self {
    Self {
      strategy,
      ..Self::default()
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn force_refresh(mut self) -> Self {
    self.force_refresh = true;
    self
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale but served anyway (background refresh or network failure)
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_staleness_boundary_is_inclusive() {
    let now = Utc::now();
    let stale_time = Duration::minutes(5);

    assert!(!is_stale(now - Duration::seconds(299), now, stale_time));
    assert!(is_stale(now - stale_time, now, stale_time));
    assert!(is_stale(now - Duration::seconds(301), now, stale_time));
  }

  #[test]
  fn test_default_options() {
    let opts = FetchOptions::default();
    assert_eq!(opts.strategy, Strategy::StaleWhileRevalidate);
    assert_eq!(opts.stale_time, Duration::minutes(5));
    assert!(!opts.force_refresh);
  }

  #[test]
  fn test_strategy_serializes_kebab_case() {
    let json = serde_json::to_string(&Strategy::StaleWhileRevalidate).unwrap();
    assert_eq!(json, "\"stale-while-revalidate\"");
    let parsed: Strategy = serde_json::from_str("\"cache-first\"").unwrap();
    assert_eq!(parsed, Strategy::CacheFirst);
  }

  #[test]
  fn test_cache_result_sources() {
    let at = Utc::now();
    assert_eq!(CacheResult::from_network(1).source, CacheSource::Network);
    assert_eq!(CacheResult::from_cache(1, at, false).source, CacheSource::CacheFresh);
    assert_eq!(CacheResult::from_cache(1, at, true).source, CacheSource::CacheStale);
    assert_eq!(CacheResult::offline(1, at).source, CacheSource::Offline);
  }
}

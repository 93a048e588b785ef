//! Process-lifetime memory cache.

use std::collections::HashMap;
use std::sync::Mutex;

use super::traits::CacheEntry;

/// In-memory map of key to entry.
///
/// Faster than the persistent store and lost on restart. Reads hand out
/// clones so callers never share state with the cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    self.lock().get(key).cloned()
  }

  pub fn set(&self, entry: CacheEntry) {
    self.lock().insert(entry.key.clone(), entry);
  }

  pub fn remove(&self, key: &str) -> Option<CacheEntry> {
    self.lock().remove(key)
  }

  pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
    let mut keys: Vec<String> = self
      .lock()
      .keys()
      .filter(|k| k.starts_with(prefix))
      .cloned()
      .collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
    // every mutation is a single map operation, so a poisoned map is still consistent
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_set_get_returns_copy() {
    let cache = MemoryCache::new();
    cache.set(CacheEntry::new("bahan:all", json!([{"id": 1}])));

    let mut read = cache.get("bahan:all").unwrap();
    read.value = json!([]);

    assert_eq!(cache.get("bahan:all").unwrap().value, json!([{"id": 1}]));
  }

  #[test]
  fn test_keys_with_prefix_sorted() {
    let cache = MemoryCache::new();
    cache.set(CacheEntry::new("bahan:id:1", json!({"id": 1})));
    cache.set(CacheEntry::new("bahan:all", json!([])));
    cache.set(CacheEntry::new("produk:all", json!([])));

    assert_eq!(
      cache.keys_with_prefix("bahan:"),
      vec!["bahan:all".to_string(), "bahan:id:1".to_string()]
    );
    assert!(cache.remove("produk:all").is_some());
    assert_eq!(cache.len(), 2);
  }
}

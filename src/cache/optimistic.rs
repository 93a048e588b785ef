//! Optimistic mutations: speculative cache edits confirmed or undone once the
//! backend answers.
//!
//! Rollback never attempts a precise undo. A failed mutation evicts its whole
//! namespace so the next read re-fetches authoritative data. Creates are
//! evicted on success as well, because the temporary id cannot be matched
//! to the id the backend assigned.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::key::Namespace;
use super::layer::CacheLayer;
use super::storage::PersistentStore;
use super::traits::CacheEntry;

/// Generator for temporary record ids.
///
/// Ids are negative, so they never clash with backend ids, and strictly
/// decreasing even when several are taken within one millisecond.
#[derive(Debug, Default)]
pub struct TempIds {
  last: AtomicI64,
}

impl TempIds {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next(&self) -> i64 {
    let candidate = -Utc::now().timestamp_millis();
    let mut last = self.last.load(Ordering::Relaxed);
    loop {
      let next = if last == 0 { candidate } else { candidate.min(last - 1) };
      match self
        .last
        .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
      {
        Ok(_) => return next,
        Err(actual) => last = actual,
      }
    }
  }
}

/// Whether `id` came from [`TempIds`].
pub fn is_temp_id(id: i64) -> bool {
  id < 0
}

/// The speculative change carried by a [`Mutation`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
  /// Insert `record` (already carrying a temporary id) at the front of lists
  Create { record: Value },
  /// Merge `patch` into the record with `id`
  Update { id: i64, patch: Value },
  /// Drop the record with `id`
  Delete { id: i64 },
}

/// One optimistic mutation against a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  pub namespace: Namespace,
  pub kind: MutationKind,
}

impl Mutation {
  /// Create `record` under a temporary id.
  pub fn create(namespace: Namespace, mut record: Value, temp_id: i64) -> Self {
    if let Value::Object(fields) = &mut record {
      fields.insert("id".to_string(), Value::from(temp_id));
    }
    Self {
      namespace,
      kind: MutationKind::Create { record },
    }
  }

  pub fn update(namespace: Namespace, id: i64, patch: Value) -> Self {
    Self {
      namespace,
      kind: MutationKind::Update { id, patch },
    }
  }

  pub fn delete(namespace: Namespace, id: i64) -> Self {
    Self {
      namespace,
      kind: MutationKind::Delete { id },
    }
  }

  /// Operation name used in offline errors.
  pub fn verb(&self) -> &'static str {
    match self.kind {
      MutationKind::Create { .. } => "create data",
      MutationKind::Update { .. } => "update data",
      MutationKind::Delete { .. } => "delete data",
    }
  }

  /// Speculatively edit cached entries before the backend confirms.
  pub fn apply<S: PersistentStore + 'static>(&self, cache: &CacheLayer<S>) {
    let all_prefix = format!("{}all", self.namespace.prefix());

    match &self.kind {
      MutationKind::Create { record } => {
        for key in cache.keys_with_prefix(&all_prefix) {
          rewrite_list(cache, &key, |items| items.insert(0, record.clone()));
        }
      }
      MutationKind::Update { id, patch } => {
        let id_key = self.namespace.id_key(*id);
        if let Some(mut entry) = cache.read_entry(&id_key) {
          merge(&mut entry.value, patch);
          cache.write_entry(entry);
        }
        for key in self.list_keys(cache) {
          rewrite_list(cache, &key, |items| {
            for item in items.iter_mut().filter(|item| has_id(item, *id)) {
              merge(item, patch);
            }
          });
        }
      }
      MutationKind::Delete { id } => {
        cache.remove_entry(&self.namespace.id_key(*id));
        for key in self.list_keys(cache) {
          rewrite_list(cache, &key, |items| items.retain(|item| !has_id(item, *id)));
        }
      }
    }
    debug!(namespace = %self.namespace, verb = self.verb(), "applied optimistic update");
  }

  /// Reconcile after the backend confirmed. `confirmed` is the backend's record
  /// (`Null` for deletes).
  pub fn commit<S: PersistentStore + 'static>(&self, cache: &CacheLayer<S>, confirmed: &Value) {
    match &self.kind {
      MutationKind::Create { .. } => cache.invalidate_prefix(&self.namespace.prefix()),
      MutationKind::Update { id, .. } => {
        if confirmed.is_object() {
          cache.write_entry(CacheEntry::new(
            self.namespace.id_key(*id),
            confirmed.clone(),
          ));
          for key in self.list_keys(cache) {
            rewrite_list(cache, &key, |items| {
              for item in items.iter_mut().filter(|item| has_id(item, *id)) {
                *item = confirmed.clone();
              }
            });
          }
        }
        self.evict_derived(cache);
      }
      MutationKind::Delete { .. } => self.evict_derived(cache),
    }
  }

  /// Undo by eviction.
  pub fn rollback<S: PersistentStore + 'static>(&self, cache: &CacheLayer<S>) {
    cache.invalidate_prefix(&self.namespace.prefix());
  }

  /// List-type entries (arrays) in the namespace.
  fn list_keys<S: PersistentStore + 'static>(&self, cache: &CacheLayer<S>) -> Vec<String> {
    cache
      .keys_with_prefix(&self.namespace.prefix())
      .into_iter()
      .filter(|key| {
        cache
          .read_entry(key)
          .is_some_and(|entry| entry.value.is_array())
      })
      .collect()
  }

  /// Aggregates computed from the namespace are neither lists nor single
  /// records; they cannot be patched, so they are dropped.
  fn evict_derived<S: PersistentStore + 'static>(&self, cache: &CacheLayer<S>) {
    let id_prefix = format!("{}id:", self.namespace.prefix());
    for key in cache.keys_with_prefix(&self.namespace.prefix()) {
      if key.starts_with(&id_prefix) {
        continue;
      }
      if cache
        .read_entry(&key)
        .is_some_and(|entry| entry.value.is_object())
      {
        cache.remove_entry(&key);
      }
    }
  }
}

/// Edit the array stored under `key`, keeping its timestamp.
fn rewrite_list<S, F>(cache: &CacheLayer<S>, key: &str, edit: F)
where
  S: PersistentStore + 'static,
  F: FnOnce(&mut Vec<Value>),
{
  let Some(mut entry) = cache.read_entry(key) else {
    return;
  };
  let Value::Array(items) = &mut entry.value else {
    return;
  };
  edit(items);
  cache.write_entry(entry);
}

fn has_id(item: &Value, id: i64) -> bool {
  item.get("id").and_then(Value::as_i64) == Some(id)
}

/// Shallow merge of `patch`'s fields into `target`.
fn merge(target: &mut Value, patch: &Value) {
  let (Value::Object(target), Value::Object(patch)) = (target, patch) else {
    return;
  };
  merge_fields(target, patch);
}

fn merge_fields(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
  for (field, value) in patch {
    target.insert(field.clone(), value.clone());
  }
}

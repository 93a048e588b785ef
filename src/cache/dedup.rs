//! In-flight request registry used to collapse concurrent fetches of one key.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{Error, Result};

/// Handle every caller of one key awaits.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

/// Map of key to the fetch currently running for it.
#[derive(Default)]
pub struct PendingRequests {
  inflight: Mutex<HashMap<String, SharedFetch>>,
}

impl PendingRequests {
  pub fn new() -> Self {
    Self::default()
  }

  /// Join the fetch running for `key`, or start one with `start`.
  ///
  /// A started fetch runs on its own task, so it completes (and its entry is
  /// removed) even if every caller stops waiting. The entry is removed before
  /// the outcome reaches any waiter.
  pub fn join_or_start<F, Fut>(self: &Arc<Self>, key: &str, start: F) -> SharedFetch
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    let mut inflight = self.lock();
    if let Some(existing) = inflight.get(key) {
      debug!(key, "joining in-flight request");
      return existing.clone();
    }

    debug!(key, "starting request");
    let fetch = start();
    let guard = PendingGuard {
      pending: Arc::clone(self),
      key: key.to_string(),
    };
    let handle = tokio::spawn(async move {
      let result = fetch.await;
      drop(guard);
      result
    });

    let shared = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(Error::Internal(format!("request task failed: {}", e))))
    }
    .boxed()
    .shared();

    inflight.insert(key.to_string(), shared.clone());
    shared
  }

  pub fn is_pending(&self, key: &str) -> bool {
    self.lock().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
    self
      .inflight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Removes the pending entry when the fetch task finishes, panics included.
struct PendingGuard {
  pending: Arc<PendingRequests>,
  key: String,
}

impl Drop for PendingGuard {
  fn drop(&mut self) {
    self.pending.lock().remove(&self.key);
  }
}

//! Online/offline status and transition notifications.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Current network reachability plus a stream of transitions.
///
/// Whatever observes the runtime's network signal feeds it through
/// [`Connectivity::set_online`]; everything else only reads. Cloning shares
/// the same underlying signal.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
  /// One message per offline -> online transition
  reconnects: broadcast::Sender<()>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    let (reconnects, _) = broadcast::channel(16);
    Self {
      tx: Arc::new(tx),
      reconnects,
    }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the latest network status. Only actual changes notify subscribers.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "connectivity changed");
      if online {
        // no listeners is fine
        let _ = self.reconnects.send(());
      }
    }
  }

  /// Receiver that observes every status change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Run `callback` on every transition to online.
  ///
  /// The listener lives until the returned handle is aborted or the
  /// connectivity signal is dropped.
  pub fn on_online<F, Fut>(&self, callback: F) -> JoinHandle<()>
  where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let mut rx = self.reconnects.subscribe();
    tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(()) => callback().await,
          // Missed transitions collapse into a single refresh
          Err(broadcast::error::RecvError::Lagged(_)) => callback().await,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    })
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[test]
  fn test_is_online_reflects_last_set() {
    let connectivity = Connectivity::new(true);
    assert!(connectivity.is_online());
    connectivity.set_online(false);
    assert!(!connectivity.is_online());
    assert!(!connectivity.clone().is_online());
  }

  #[tokio::test]
  async fn test_on_online_fires_on_transition_only() {
    let connectivity = Connectivity::new(false);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let handle = connectivity.on_online(move || {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
      }
    });

    connectivity.set_online(true);
    wait_for(|| calls.load(Ordering::SeqCst) == 1).await;

    // Repeating the same status is not a transition
    connectivity.set_online(true);
    connectivity.set_online(false);
    connectivity.set_online(true);
    wait_for(|| calls.load(Ordering::SeqCst) == 2).await;

    handle.abort();
  }

  async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..200 {
      if cond() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
  }
}

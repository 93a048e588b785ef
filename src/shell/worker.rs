//! Install / activate / fetch lifecycle of the application shell cache.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use url::{Origin, Url};

use super::buckets::ShellBuckets;
use super::network::{AssetNetwork, AssetRequest, AssetResponse};
use super::{APP_SHELL, SHELL_DOCUMENT};

/// Lifecycle position of a [`ShellCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
  /// Created, nothing cached yet
  Parsed,
  /// App shell populated; waiting is skipped
  Installed,
  /// Old buckets removed and fetches intercepted
  Activated,
}

/// What the fetch handler decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Not intercepted; the request goes to the network untouched
  Passthrough,
  /// Intercepted; `None` means the request failed with nothing cached
  Respond(Option<AssetResponse>),
}

/// Versioned cache of the static application shell.
pub struct ShellCache<B: ShellBuckets, N: AssetNetwork> {
  buckets: B,
  network: N,
  origin: Url,
  version: String,
  state: Mutex<ShellState>,
}

impl<B: ShellBuckets, N: AssetNetwork> ShellCache<B, N> {
  /// Shell cache serving `origin` from the bucket named `version`.
  pub fn new(buckets: B, network: N, origin: Url, version: impl Into<String>) -> Self {
    Self {
      buckets,
      network,
      origin,
      version: version.into(),
      state: Mutex::new(ShellState::Parsed),
    }
  }

  /// Shell cache resuming an earlier session: it is already active when the
  /// current bucket exists, and starts over otherwise.
  pub fn restore(buckets: B, network: N, origin: Url, version: impl Into<String>) -> Result<Self> {
    let shell = Self::new(buckets, network, origin, version);
    if shell.buckets.bucket_names()?.contains(&shell.version) {
      shell.set_state(ShellState::Activated);
    }
    Ok(shell)
  }

  pub fn state(&self) -> ShellState {
    *self.lock_state()
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn buckets(&self) -> &B {
    &self.buckets
  }

  /// Open the current bucket and cache the app shell.
  ///
  /// Resources that fail to download are skipped. Returns how many were
  /// cached.
  pub async fn install(&self) -> Result<usize> {
    self.buckets.open(&self.version)?;

    let mut cached = 0;
    for path in APP_SHELL {
      let url = self.resolve(path)?;
      match self.network.fetch(&AssetRequest::get(url.clone())).await {
        Ok(response) if response.is_success() => {
          match self.buckets.put(&self.version, url.as_str(), &response) {
            Ok(()) => cached += 1,
            Err(e) => warn!(url = %url, error = %e, "failed to cache shell resource"),
          }
        }
        Ok(response) => {
          warn!(url = %url, status = response.status, "shell resource not cached")
        }
        Err(e) => warn!(url = %url, error = %e, "failed to fetch shell resource"),
      }
    }

    self.set_state(ShellState::Installed);
    info!(version = %self.version, cached, "shell cache installed");
    Ok(cached)
  }

  /// Delete every bucket but the current one and start intercepting fetches.
  ///
  /// Returns the names of the deleted buckets.
  pub async fn activate(&self) -> Result<Vec<String>> {
    if self.state() == ShellState::Parsed {
      return Err(eyre!("Shell cache must be installed before activation"));
    }

    let mut deleted = Vec::new();
    for name in self.buckets.bucket_names()? {
      if name != self.version {
        self.buckets.delete(&name)?;
        deleted.push(name);
      }
    }

    self.set_state(ShellState::Activated);
    info!(version = %self.version, deleted = deleted.len(), "shell cache activated");
    Ok(deleted)
  }

  /// Handle one request.
  pub async fn fetch(&self, request: &AssetRequest) -> FetchOutcome {
    if self.state() != ShellState::Activated {
      return FetchOutcome::Passthrough;
    }
    if request.method != Method::GET || request.url.origin() != self.origin() {
      debug!(method = %request.method, url = %request.url, "not intercepting");
      return FetchOutcome::Passthrough;
    }

    if request.is_navigation() {
      FetchOutcome::Respond(self.navigate(request).await)
    } else {
      FetchOutcome::Respond(self.cache_first(request).await)
    }
  }

  /// Cached shell document first, then the network.
  async fn navigate(&self, request: &AssetRequest) -> Option<AssetResponse> {
    let document = self.resolve(SHELL_DOCUMENT).ok()?;
    if let Some(cached) = self.lookup(document.as_str()) {
      return Some(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(document.as_str(), &response);
        }
        Some(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "navigation failed");
        self.lookup(document.as_str())
      }
    }
  }

  async fn cache_first(&self, request: &AssetRequest) -> Option<AssetResponse> {
    let key = asset_key(&request.url);
    if let Some(cached) = self.lookup(&key) {
      return Some(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&key, &response);
        }
        Some(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "asset fetch failed");
        None
      }
    }
  }

  fn lookup(&self, url: &str) -> Option<AssetResponse> {
    match self.buckets.get(&self.version, url) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url, error = %e, "failed to read shell cache");
        None
      }
    }
  }

  fn store(&self, url: &str, response: &AssetResponse) {
    if let Err(e) = self.buckets.put(&self.version, url, response) {
      warn!(url, error = %e, "failed to update shell cache");
    }
  }

  fn origin(&self) -> Origin {
    self.origin.origin()
  }

  fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid shell path {}: {}", path, e))
  }

  fn lock_state(&self) -> std::sync::MutexGuard<'_, ShellState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn set_state(&self, state: ShellState) {
    *self.lock_state() = state;
  }
}

/// Cache key of a request URL; fragments never reach the server.
fn asset_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::shell::buckets::SqliteBuckets;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  const ORIGIN: &str = "https://stokify.app";
  const VERSION: &str = "stokify-pwa-v1";

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn ok(body: &str) -> AssetResponse {
    AssetResponse {
      status: 200,
      content_type: Some("text/plain".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  /// Network answering from a fixed table; unknown URLs fail.
  #[derive(Default)]
  struct ScriptedNetwork {
    responses: Mutex<HashMap<String, AssetResponse>>,
    calls: AtomicUsize,
  }

  impl ScriptedNetwork {
    fn with(entries: &[(&str, AssetResponse)]) -> Self {
      let network = Self::default();
      for (u, r) in entries {
        network.set(u, r.clone());
      }
      network
    }

    fn set(&self, url: &str, response: AssetResponse) {
      self
        .responses
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    fn clear(&self) {
      self.responses.lock().unwrap().clear();
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl AssetNetwork for ScriptedNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .responses
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("network unreachable"))
    }
  }

  impl AssetNetwork for Arc<ScriptedNetwork> {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
      <ScriptedNetwork as AssetNetwork>::fetch(self, request).await
    }
  }

  /// Buckets wrapper counting every call.
  struct RecordingBuckets {
    inner: SqliteBuckets,
    calls: AtomicUsize,
  }

  impl RecordingBuckets {
    fn new() -> Self {
      Self {
        inner: SqliteBuckets::open_in_memory().unwrap(),
        calls: AtomicUsize::new(0),
      }
    }

    fn record(&self) {
      self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl ShellBuckets for RecordingBuckets {
    fn bucket_names(&self) -> Result<Vec<String>> {
      self.record();
      self.inner.bucket_names()
    }

    fn open(&self, bucket: &str) -> Result<()> {
      self.record();
      self.inner.open(bucket)
    }

    fn delete(&self, bucket: &str) -> Result<bool> {
      self.record();
      self.inner.delete(bucket)
    }

    fn get(&self, bucket: &str, url: &str) -> Result<Option<AssetResponse>> {
      self.record();
      self.inner.get(bucket, url)
    }

    fn put(&self, bucket: &str, url: &str, response: &AssetResponse) -> Result<()> {
      self.record();
      self.inner.put(bucket, url, response)
    }
  }

  fn shell_network() -> Arc<ScriptedNetwork> {
    Arc::new(ScriptedNetwork::with(&[
      ("https://stokify.app/", ok("root")),
      ("https://stokify.app/index.html", ok("<html>shell</html>")),
    ]))
  }

  async fn activated(
    network: Arc<ScriptedNetwork>,
  ) -> ShellCache<RecordingBuckets, Arc<ScriptedNetwork>> {
    let shell = ShellCache::new(RecordingBuckets::new(), network, url(ORIGIN), VERSION);
    shell.install().await.unwrap();
    shell.activate().await.unwrap();
    shell
  }

  #[tokio::test]
  async fn test_install_caches_app_shell() {
    let shell = ShellCache::new(
      SqliteBuckets::open_in_memory().unwrap(),
      shell_network(),
      url(ORIGIN),
      VERSION,
    );
    assert_eq!(shell.install().await.unwrap(), 2);
    assert_eq!(shell.state(), ShellState::Installed);
    assert!(shell
      .buckets()
      .get(VERSION, "https://stokify.app/index.html")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_install_swallows_resource_failures() {
    let network = Arc::new(ScriptedNetwork::with(&[("https://stokify.app/", ok("root"))]));
    let shell = ShellCache::new(
      SqliteBuckets::open_in_memory().unwrap(),
      network,
      url(ORIGIN),
      VERSION,
    );
    assert_eq!(shell.install().await.unwrap(), 1);
    assert_eq!(shell.state(), ShellState::Installed);
  }

  #[tokio::test]
  async fn test_activate_deletes_old_buckets() {
    let buckets = SqliteBuckets::open_in_memory().unwrap();
    buckets.put("stokify-pwa-v0", "https://stokify.app/", &ok("old")).unwrap();
    let shell = ShellCache::new(buckets, shell_network(), url(ORIGIN), VERSION);

    assert!(shell.activate().await.is_err());
    shell.install().await.unwrap();
    let deleted = shell.activate().await.unwrap();

    assert_eq!(deleted, vec!["stokify-pwa-v0".to_string()]);
    assert_eq!(shell.buckets().bucket_names().unwrap(), vec![VERSION]);
    assert_eq!(shell.state(), ShellState::Activated);
  }

  #[tokio::test]
  async fn test_restore_resumes_existing_bucket() {
    let buckets = SqliteBuckets::open_in_memory().unwrap();
    let fresh = ShellCache::restore(buckets, shell_network(), url(ORIGIN), VERSION).unwrap();
    assert_eq!(fresh.state(), ShellState::Parsed);

    let buckets = SqliteBuckets::open_in_memory().unwrap();
    buckets.open(VERSION).unwrap();
    let resumed = ShellCache::restore(buckets, shell_network(), url(ORIGIN), VERSION).unwrap();
    assert_eq!(resumed.state(), ShellState::Activated);
  }

  #[tokio::test]
  async fn test_requests_pass_through_before_activation() {
    let network = shell_network();
    let shell = ShellCache::new(RecordingBuckets::new(), network, url(ORIGIN), VERSION);
    shell.install().await.unwrap();

    let outcome = shell
      .fetch(&AssetRequest::navigate(url("https://stokify.app/stok")))
      .await;
    assert_eq!(outcome, FetchOutcome::Passthrough);
  }

  #[tokio::test]
  async fn test_cross_origin_get_is_never_intercepted() {
    let network = shell_network();
    let shell = activated(Arc::clone(&network)).await;
    let bucket_calls = shell.buckets().calls();
    let network_calls = network.calls();

    let request = AssetRequest::get(url("https://project.supabase.co/rest/v1/bahan?select=*"));
    assert_eq!(shell.fetch(&request).await, FetchOutcome::Passthrough);

    assert_eq!(shell.buckets().calls(), bucket_calls);
    assert_eq!(network.calls(), network_calls);
  }

  #[tokio::test]
  async fn test_non_get_is_never_intercepted() {
    let network = shell_network();
    let shell = activated(Arc::clone(&network)).await;
    let bucket_calls = shell.buckets().calls();

    let request = AssetRequest::get(url("https://stokify.app/api/upload")).with_method(Method::POST);
    assert_eq!(shell.fetch(&request).await, FetchOutcome::Passthrough);
    assert_eq!(shell.buckets().calls(), bucket_calls);
  }

  #[tokio::test]
  async fn test_navigation_serves_cached_shell() {
    let network = shell_network();
    let shell = activated(Arc::clone(&network)).await;
    let network_calls = network.calls();

    let outcome = shell
      .fetch(&AssetRequest::navigate(url("https://stokify.app/keuangan")))
      .await;
    assert_eq!(outcome, FetchOutcome::Respond(Some(ok("<html>shell</html>"))));
    assert_eq!(network.calls(), network_calls);
  }

  #[tokio::test]
  async fn test_navigation_without_cache_stores_shell_document() {
    let network = Arc::new(ScriptedNetwork::default());
    let shell = activated(Arc::clone(&network)).await;
    network.set("https://stokify.app/produk", ok("<html>fresh</html>"));

    let outcome = shell
      .fetch(&AssetRequest::navigate(url("https://stokify.app/produk")))
      .await;
    assert_eq!(outcome, FetchOutcome::Respond(Some(ok("<html>fresh</html>"))));
    assert_eq!(
      shell
        .buckets()
        .get(VERSION, "https://stokify.app/index.html")
        .unwrap(),
      Some(ok("<html>fresh</html>"))
    );
  }

  #[tokio::test]
  async fn test_navigation_total_failure_is_empty_response() {
    let network = Arc::new(ScriptedNetwork::default());
    let shell = activated(network).await;

    let outcome = shell
      .fetch(&AssetRequest::navigate(url("https://stokify.app/")))
      .await;
    assert_eq!(outcome, FetchOutcome::Respond(None));
  }

  #[tokio::test]
  async fn test_assets_are_cache_first() {
    let network = shell_network();
    network.set("https://stokify.app/assets/app.js", ok("console.log(1)"));
    let shell = activated(Arc::clone(&network)).await;

    let request = AssetRequest::get(url("https://stokify.app/assets/app.js"));
    let first = shell.fetch(&request).await;
    network.clear();
    let second = shell.fetch(&request).await;

    assert_eq!(first, FetchOutcome::Respond(Some(ok("console.log(1)"))));
    assert_eq!(second, first);
  }

  #[tokio::test]
  async fn test_error_responses_are_not_cached() {
    let network = shell_network();
    let missing = AssetResponse {
      status: 404,
      content_type: None,
      body: Vec::new(),
    };
    network.set("https://stokify.app/logo.png", missing.clone());
    let shell = activated(Arc::clone(&network)).await;

    let request = AssetRequest::get(url("https://stokify.app/logo.png"));
    assert_eq!(shell.fetch(&request).await, FetchOutcome::Respond(Some(missing)));
    assert!(shell
      .buckets()
      .get(VERSION, "https://stokify.app/logo.png")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_asset_total_failure_is_empty_response() {
    let network = shell_network();
    let shell = activated(network).await;

    let request = AssetRequest::get(url("https://stokify.app/assets/missing.css"));
    assert_eq!(shell.fetch(&request).await, FetchOutcome::Respond(None));
  }
}

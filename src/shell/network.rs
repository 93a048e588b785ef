//! Asset requests, responses and the network they are fetched from.

use color_eyre::{eyre::eyre, Result};
use reqwest::{header, Method};
use std::future::Future;
use url::Url;

/// How the request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Script, stylesheet, image or other subresource
  Subresource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl AssetRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl AssetResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Network used by the shell cache.
///
/// Only transport failures are errors; HTTP error statuses are responses.
pub trait AssetNetwork: Send + Sync {
  fn fetch(&self, request: &AssetRequest) -> impl Future<Output = Result<AssetResponse>> + Send;
}

/// Asset network over HTTP.
#[derive(Clone)]
pub struct HttpAssetNetwork {
  http: reqwest::Client,
}

impl HttpAssetNetwork {
  pub fn new() -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("stokify/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { http })
  }
}

impl AssetNetwork for HttpAssetNetwork {
  async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
    let response = self
      .http
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(AssetResponse {
      status,
      content_type,
      body,
    })
  }
}

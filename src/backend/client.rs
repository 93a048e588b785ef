use reqwest::{header, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{BackendError, Error, Result};

/// Source of the API key and the optional session token.
pub trait Credentials {
  fn api_key(&self) -> color_eyre::Result<String>;

  /// Signed-in user's token; requests fall back to the API key without one.
  fn access_token(&self) -> Option<String>;
}

/// Remote table access.
///
/// Implementations return records as raw JSON; decoding into domain types
/// happens in the cached layer.
pub trait Backend: Clone + Send + Sync + 'static {
  fn select(&self, table: &str, query: &SelectQuery)
    -> impl Future<Output = Result<Vec<Value>>> + Send;

  /// Insert one record and return it as stored.
  fn insert(&self, table: &str, record: Value) -> impl Future<Output = Result<Value>> + Send;

  /// Update the record with `id` and return it as stored.
  fn update(&self, table: &str, id: i64, patch: Value)
    -> impl Future<Output = Result<Value>> + Send;

  fn delete(&self, table: &str, id: i64) -> impl Future<Output = Result<()>> + Send;
}

// ============================================================================
// Query building
// ============================================================================

/// Row filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
  Eq(String, String),
  Gte(String, String),
  Lte(String, String),
  In(String, Vec<String>),
}

impl Filter {
  pub fn eq(column: &str, value: impl ToString) -> Self {
    Self::Eq(column.to_string(), value.to_string())
  }

  pub fn gte(column: &str, value: impl ToString) -> Self {
    Self::Gte(column.to_string(), value.to_string())
  }

  pub fn lte(column: &str, value: impl ToString) -> Self {
    Self::Lte(column.to_string(), value.to_string())
  }

  pub fn any_of<V: ToString>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
    Self::In(
      column.to_string(),
      values.into_iter().map(|v| v.to_string()).collect(),
    )
  }

  fn to_pair(&self) -> (String, String) {
    match self {
      Self::Eq(col, v) => (col.clone(), format!("eq.{}", v)),
      Self::Gte(col, v) => (col.clone(), format!("gte.{}", v)),
      Self::Lte(col, v) => (col.clone(), format!("lte.{}", v)),
      Self::In(col, values) => (col.clone(), format!("in.({})", values.join(","))),
    }
  }
}

/// A list read: column selection, filters, ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
  pub columns: Option<String>,
  pub filters: Vec<Filter>,
  pub order: Option<String>,
  pub limit: Option<u32>,
}

impl SelectQuery {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn columns(mut self, columns: Option<&str>) -> Self {
    self.columns = columns.map(String::from);
    self
  }

  pub fn filter(mut self, filter: Filter) -> Self {
    self.filters.push(filter);
    self
  }

  pub fn order(mut self, order: &str) -> Self {
    self.order = Some(order.to_string());
    self
  }

  pub fn limit(mut self, limit: Option<u32>) -> Self {
    self.limit = limit;
    self
  }

  /// Query string pairs in the PostgREST dialect.
  pub fn to_query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = vec![(
      "select".to_string(),
      self.columns.clone().unwrap_or_else(|| "*".to_string()),
    )];
    pairs.extend(self.filters.iter().map(Filter::to_pair));
    if let Some(order) = &self.order {
      pairs.push(("order".to_string(), order.clone()));
    }
    if let Some(limit) = self.limit {
      pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
  }
}

// ============================================================================
// REST implementation
// ============================================================================

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  details: Option<String>,
  #[serde(default)]
  hint: Option<String>,
}

/// Backend client for the hosted PostgREST API.
#[derive(Clone)]
pub struct RestBackend {
  http: reqwest::Client,
  rest_url: Url,
  api_key: String,
  access_token: Option<String>,
}

impl RestBackend {
  pub fn new(config: &Config, credentials: &impl Credentials) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    let api_key = credentials.api_key()?;
    let base = config.backend.url.trim_end_matches('/');
    let rest_url = Url::parse(&format!("{}/rest/v1/", base))
      .map_err(|e| eyre!("Invalid backend url {}: {}", config.backend.url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("stokify/", env!("CARGO_PKG_VERSION")))
      .timeout(std::time::Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      rest_url,
      api_key,
      access_token: credentials.access_token(),
    })
  }

  fn table_url(&self, table: &str) -> Result<Url> {
    self
      .rest_url
      .join(table)
      .map_err(|e| Error::Internal(format!("invalid table name {}: {}", table, e)))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let token = self.access_token.as_deref().unwrap_or(&self.api_key);
    self
      .http
      .request(method, url)
      .header("apikey", &self.api_key)
      .header(header::AUTHORIZATION, format!("Bearer {}", token))
  }

  async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
    let response = builder
      .send()
      .await
      .map_err(|e| BackendError::new(format!("Request failed: {}", e)))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, &body).into())
  }

  async fn json_rows(&self, builder: RequestBuilder) -> Result<Vec<Value>> {
    self
      .send(builder)
      .await?
      .json::<Vec<Value>>()
      .await
      .map_err(|e| BackendError::new(format!("Failed to parse response: {}", e)).into())
  }
}

impl Backend for RestBackend {
  async fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Value>> {
    let url = self.table_url(table)?;
    debug!(table, ?query, "select");
    let builder = self
      .request(Method::GET, url)
      .query(&query.to_query_pairs());
    self.json_rows(builder).await
  }

  async fn insert(&self, table: &str, record: Value) -> Result<Value> {
    let url = self.table_url(table)?;
    debug!(table, "insert");
    let builder = self
      .request(Method::POST, url)
      .header("Prefer", "return=representation")
      .json(&[record]);
    first_row(self.json_rows(builder).await?, table, None)
  }

  async fn update(&self, table: &str, id: i64, patch: Value) -> Result<Value> {
    let url = self.table_url(table)?;
    debug!(table, id, "update");
    let builder = self
      .request(Method::PATCH, url)
      .query(&[Filter::eq("id", id).to_pair()])
      .header("Prefer", "return=representation")
      .json(&patch);
    first_row(self.json_rows(builder).await?, table, Some(id))
  }

  async fn delete(&self, table: &str, id: i64) -> Result<()> {
    let url = self.table_url(table)?;
    debug!(table, id, "delete");
    let builder = self
      .request(Method::DELETE, url)
      .query(&[Filter::eq("id", id).to_pair()]);
    self.send(builder).await?;
    Ok(())
  }
}

/// First row of a write response; an empty response means nothing matched.
fn first_row(rows: Vec<Value>, table: &str, id: Option<i64>) -> Result<Value> {
  rows.into_iter().next().ok_or_else(|| {
    let message = match id {
      Some(id) => format!("No {} row with id {}", table, id),
      None => format!("Insert into {} returned no row", table),
    };
    BackendError::with_status(404, message).into()
  })
}

fn api_error(status: StatusCode, body: &str) -> BackendError {
  let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
  let mut message = parsed
    .message
    .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());
  if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
    message = format!("{}: {}", message, details);
  }
  if let Some(hint) = parsed.hint.filter(|h| !h.is_empty()) {
    message = format!("{} ({})", message, hint);
  }
  BackendError::with_status(status.as_u16(), message)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_default_query_selects_everything() {
    assert_eq!(SelectQuery::new().to_query_pairs(), pairs(&[("select", "*")]));
  }

  #[test]
  fn test_query_pairs_in_postgrest_dialect() {
    let query = SelectQuery::new()
      .columns(Some("id,nama,stok"))
      .filter(Filter::eq("kategori", "gaji"))
      .filter(Filter::gte("tanggal", "2024-01-01"))
      .filter(Filter::lte("tanggal", "2024-01-31"))
      .filter(Filter::any_of("id", [3, 1]))
      .order("tanggal.desc")
      .limit(Some(1000));

    assert_eq!(
      query.to_query_pairs(),
      pairs(&[
        ("select", "id,nama,stok"),
        ("kategori", "eq.gaji"),
        ("tanggal", "gte.2024-01-01"),
        ("tanggal", "lte.2024-01-31"),
        ("id", "in.(3,1)"),
        ("order", "tanggal.desc"),
        ("limit", "1000"),
      ])
    );
  }

  #[test]
  fn test_api_error_uses_body_message() {
    let body = json!({
      "code": "23505",
      "message": "duplicate key value violates unique constraint",
      "details": "Key (nama)=(Gula) already exists.",
      "hint": null
    })
    .to_string();
    let err = api_error(StatusCode::CONFLICT, &body);
    assert_eq!(err.status, Some(409));
    assert!(err.message.starts_with("duplicate key"));
    assert!(err.message.contains("already exists"));
  }

  #[test]
  fn test_api_error_without_body() {
    let err = api_error(StatusCode::INTERNAL_SERVER_ERROR, "");
    assert_eq!(err.status, Some(500));
    assert_eq!(err.message, "Internal Server Error");
  }

  #[test]
  fn test_empty_write_response_is_not_found() {
    let err = first_row(Vec::new(), "bahan", Some(9)).unwrap_err();
    match err {
      Error::Backend(e) => {
        assert_eq!(e.status, Some(404));
        assert!(e.message.contains("id 9"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }
}

//! Named, versioned buckets of cached asset responses.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::network::AssetResponse;

/// Storage for the shell cache.
///
/// Responses are keyed by bucket name and request URL.
pub trait ShellBuckets: Send + Sync {
  /// Names of every existing bucket, sorted.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Create `bucket` if it does not exist yet.
  fn open(&self, bucket: &str) -> Result<()>;

  /// Delete `bucket` and everything in it. Returns whether it existed.
  fn delete(&self, bucket: &str) -> Result<bool>;

  fn get(&self, bucket: &str, url: &str) -> Result<Option<AssetResponse>>;

  fn put(&self, bucket: &str, url: &str, response: &AssetResponse) -> Result<()>;
}

/// SQLite-backed shell buckets.
pub struct SqliteBuckets {
  conn: Mutex<Connection>,
}

impl SqliteBuckets {
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create shell cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open shell cache at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory shell cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SHELL_SCHEMA)
      .map_err(|e| eyre!("Failed to run shell cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const SHELL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS shell_buckets (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS shell_assets (
    bucket TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    PRIMARY KEY (bucket, url)
);
"#;

impl ShellBuckets for SqliteBuckets {
  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM shell_buckets ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare bucket query: {}", e))?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read bucket name: {}", e))?;
    Ok(names)
  }

  fn open(&self, bucket: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO shell_buckets (name) VALUES (?)",
        params![bucket],
      )
      .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;
    Ok(())
  }

  fn delete(&self, bucket: &str) -> Result<bool> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM shell_assets WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete assets of bucket {}: {}", bucket, e))?;
    let removed = conn
      .execute("DELETE FROM shell_buckets WHERE name = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;
    Ok(removed > 0)
  }

  fn get(&self, bucket: &str, url: &str) -> Result<Option<AssetResponse>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT status, content_type, body FROM shell_assets WHERE bucket = ? AND url = ?",
        params![bucket, url],
        |row| {
          Ok(AssetResponse {
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached asset {}: {}", url, e))
  }

  fn put(&self, bucket: &str, url: &str, response: &AssetResponse) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO shell_buckets (name) VALUES (?)",
        params![bucket],
      )
      .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO shell_assets (bucket, url, status, content_type, body)
         VALUES (?, ?, ?, ?, ?)",
        params![
          bucket,
          url,
          response.status,
          response.content_type,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to cache asset {}: {}", url, e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn page(body: &str) -> AssetResponse {
    AssetResponse {
      status: 200,
      content_type: Some("text/html".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_and_get() {
    let buckets = SqliteBuckets::open_in_memory().unwrap();
    buckets.open("stokify-pwa-v1").unwrap();
    buckets
      .put("stokify-pwa-v1", "https://stokify.app/index.html", &page("<html>"))
      .unwrap();

    let hit = buckets
      .get("stokify-pwa-v1", "https://stokify.app/index.html")
      .unwrap();
    assert_eq!(hit, Some(page("<html>")));
    assert!(buckets
      .get("stokify-pwa-v0", "https://stokify.app/index.html")
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_delete_removes_bucket_and_assets() {
    let buckets = SqliteBuckets::open_in_memory().unwrap();
    buckets.put("old", "https://stokify.app/", &page("old")).unwrap();
    buckets.open("new").unwrap();
    assert_eq!(buckets.bucket_names().unwrap(), vec!["new", "old"]);

    assert!(buckets.delete("old").unwrap());
    assert!(!buckets.delete("old").unwrap());
    assert_eq!(buckets.bucket_names().unwrap(), vec!["new"]);
    assert!(buckets.get("old", "https://stokify.app/").unwrap().is_none());
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::Credentials;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub shell: ShellConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Project URL, e.g. `https://project.supabase.co`
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Default stale time for reads without an entity-specific one
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  /// Cache database location (defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
      path: None,
    }
  }
}

fn default_stale_time_secs() -> u64 {
  300
}

impl CacheConfig {
  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(self.stale_time_secs).unwrap_or(i64::MAX / 1000))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
  /// Origin the shell cache serves (same-origin requests only)
  pub origin: Option<String>,
  #[serde(default = "default_shell_version")]
  pub version: String,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      origin: None,
      version: default_shell_version(),
    }
  }
}

fn default_shell_version() -> String {
  crate::shell::CACHE_VERSION.to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stokify.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stokify/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/stokify/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("stokify.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stokify").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    url::Url::parse(&config.backend.url)
      .map_err(|e| eyre!("Invalid backend url {}: {}", config.backend.url, e))?;
    Ok(config)
  }
}

/// Credentials read from environment variables.
///
/// The API key comes from STOKIFY_API_KEY, falling back to SUPABASE_ANON_KEY.
/// A signed-in session token may be given in STOKIFY_ACCESS_TOKEN.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl Credentials for EnvCredentials {
  fn api_key(&self) -> Result<String> {
    std::env::var("STOKIFY_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("API key not found. Set STOKIFY_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }

  fn access_token(&self) -> Option<String> {
    std::env::var("STOKIFY_ACCESS_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("backend:\n  url: https://demo.supabase.co\n").unwrap();
    assert_eq!(config.cache.stale_time_secs, 300);
    assert_eq!(config.cache.stale_time(), chrono::Duration::minutes(5));
    assert!(config.cache.path.is_none());
    assert_eq!(config.shell.version, "stokify-pwa-v1");
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
backend:
  url: https://demo.supabase.co
cache:
  stale_time_secs: 60
  path: /tmp/stokify.db
shell:
  origin: https://stokify.app
  version: stokify-pwa-v2
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.cache.stale_time(), chrono::Duration::seconds(60));
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/stokify.db")));
    assert_eq!(config.shell.origin.as_deref(), Some("https://stokify.app"));
    assert_eq!(config.shell.version, "stokify-pwa-v2");
  }

  #[test]
  fn test_invalid_backend_url_is_rejected() {
    assert!(Config::parse("backend:\n  url: not a url\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_fails() {
    let err = Config::load(Some(Path::new("/nonexistent/stokify.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}

//! Error types surfaced by the data-access layer.
//!
//! Errors are `Clone` because a single deduplicated fetch hands the same
//! outcome to every caller waiting on it.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the remote backend (validation, not-found, server fault).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", status_suffix(.status))]
pub struct BackendError {
  /// HTTP status, when the failure came from a response
  pub status: Option<u16>,
  pub message: String,
}

impl BackendError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      status: None,
      message: message.into(),
    }
  }

  pub fn with_status(status: u16, message: impl Into<String>) -> Self {
    Self {
      status: Some(status),
      message: message.into(),
    }
  }
}

fn status_suffix(status: &Option<u16>) -> String {
  status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Main error type for the sync layer.
#[derive(Debug, Clone, Error)]
pub enum Error {
  /// A mutation or forced refresh was attempted without connectivity.
  #[error("Offline: cannot {operation} while offline")]
  Offline { operation: String },

  #[error("Backend error: {0}")]
  Backend(BackendError),

  /// Nothing to fall back on: offline (or the network failed) and the key was never cached.
  #[error("Offline and no cached data available for {key}")]
  NoCachedData { key: String },

  #[error("Invalid cache key: {0:?}")]
  InvalidKey(String),

  #[error("Failed to decode data for {key}: {message}")]
  Decode { key: String, message: String },

  #[error("Internal error: {0}")]
  Internal(String),
}

impl Error {
  pub fn offline(operation: impl Into<String>) -> Self {
    Self::Offline {
      operation: operation.into(),
    }
  }

  pub fn backend(message: impl Into<String>) -> Self {
    Self::Backend(BackendError::new(message))
  }

  pub fn is_offline(&self) -> bool {
    matches!(self, Self::Offline { .. })
  }

  /// True for the "no data at all" condition, as opposed to a backend rejection.
  pub fn is_no_cached_data(&self) -> bool {
    matches!(self, Self::NoCachedData { .. })
  }
}

impl From<BackendError> for Error {
  fn from(err: BackendError) -> Self {
    Self::Backend(err)
  }
}

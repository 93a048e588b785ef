//! Offline-aware data access for the Stokify inventory and finance app.
//!
//! - [`cache`]: two-tier cache with per-call strategies, request
//!   deduplication and optimistic mutations
//! - [`backend`]: domain records, the remote table client and [`DataStore`]
//! - [`connectivity`]: online/offline signal with reconnect notifications
//! - [`shell`]: versioned cache of the static application shell

pub mod backend;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod shell;

pub use backend::DataStore;
pub use cache::CacheLayer;
pub use connectivity::Connectivity;
pub use error::{BackendError, Error, Result};

//! Offline cache for the static application shell.
//!
//! Independent of the data cache: one versioned bucket holds the shell
//! document and the assets fetched from the app's own origin. Requests to
//! other origins (the data backend) are never intercepted.

mod buckets;
mod network;
mod worker;

pub use buckets::{ShellBuckets, SqliteBuckets};
pub use network::{AssetNetwork, AssetRequest, AssetResponse, HttpAssetNetwork, RequestMode};
pub use worker::{FetchOutcome, ShellCache, ShellState};

/// Bucket name of the current shell version.
pub const CACHE_VERSION: &str = "stokify-pwa-v1";

/// Paths cached on install.
pub const APP_SHELL: [&str; 2] = ["/", "/index.html"];

/// Document served for every navigation.
pub const SHELL_DOCUMENT: &str = "/index.html";

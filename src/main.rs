use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use stokify_sync::backend::{
  Bahan, DataStore, Entity, ListOptions, Produk, RestBackend, Stocked, TransactionKind, Transaksi,
  TransaksiFilter,
};
use stokify_sync::cache::{default_db_path, CacheLayer, Namespace, SqliteStorage};
use stokify_sync::config::{Config, EnvCredentials};
use stokify_sync::connectivity::Connectivity;
use stokify_sync::shell::{
  AssetRequest, FetchOutcome, HttpAssetNetwork, ShellCache, SqliteBuckets,
};

#[derive(Parser, Debug)]
#[command(name = "stokify")]
#[command(about = "Offline-aware command line client for Stokify inventory and finance data")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/stokify/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable and serve cached data only
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List records of an entity (bahan, produk, keuangan)
  List {
    entity: Namespace,
    /// Comma-separated columns to select
    #[arg(long)]
    columns: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
    /// Transactions only: category
    #[arg(long)]
    kategori: Option<String>,
    /// Transactions only: income or expense
    #[arg(long, value_enum)]
    tipe: Option<Kind>,
    /// Transactions only: first date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Transactions only: last date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
  },

  /// Show one record
  Get { entity: Namespace, id: i64 },

  /// Create a record from a JSON object
  Create { entity: Namespace, json: String },

  /// Update a record with a JSON object of changed fields
  Update {
    entity: Namespace,
    id: i64,
    json: String,
  },

  /// Delete a record
  Delete { entity: Namespace, id: i64 },

  /// Add to (or, with a negative delta, take from) a stock level
  Stok {
    entity: Namespace,
    id: i64,
    #[arg(allow_hyphen_values = true)]
    delta: f64,
  },

  /// Finance aggregates
  Summary {
    #[arg(value_enum)]
    kind: SummaryKind,
  },

  /// Load the lists and summaries shown on the home screen
  Critical,

  /// Refresh commonly used data into the cache
  Prefetch,

  /// Remove one cache key, or every data key
  Clear { key: Option<String> },

  /// Application shell cache
  Shell {
    #[command(subcommand)]
    command: ShellCommand,
  },
}

#[derive(Subcommand, Debug)]
enum ShellCommand {
  /// Cache the application shell
  Install,
  /// Install, then remove buckets of older versions
  Activate,
  /// Run one request through the shell cache
  Fetch {
    url: Url,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
  Pemasukan,
  Pengeluaran,
}

impl From<Kind> for TransactionKind {
  fn from(kind: Kind) -> Self {
    match kind {
      Kind::Pemasukan => TransactionKind::Pemasukan,
      Kind::Pengeluaran => TransactionKind::Pengeluaran,
    }
  }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SummaryKind {
  /// Expense totals per category
  Kategori,
  /// Totals per month
  Bulanan,
  /// Totals per day
  Harian,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = install_tracing()?;

  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Shell { command } => run_shell(&config, command).await,
    command => {
      let store = open_store(&config, !args.offline)?;
      run(&store, command).await
    }
  }
}

/// Log to a daily rolling file so stdout stays clean for JSON output.
fn install_tracing() -> Result<WorkerGuard> {
  let log_dir = default_db_path()?
    .parent()
    .map(|p| p.join("logs"))
    .ok_or_else(|| eyre!("Could not determine log directory"))?;
  std::fs::create_dir_all(&log_dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "stokify.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stokify_sync=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

type Store = DataStore<RestBackend, SqliteStorage>;

fn open_store(config: &Config, online: bool) -> Result<Store> {
  let backend = RestBackend::new(config, &EnvCredentials)?;
  let storage = match &config.cache.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  let cache = CacheLayer::new(storage, Connectivity::new(online))
    .with_stale_time(config.cache.stale_time());
  Ok(DataStore::new(backend, cache))
}

async fn run(store: &Store, command: Command) -> Result<()> {
  match command {
    Command::List {
      entity,
      columns,
      limit,
      kategori,
      tipe,
      from,
      to,
    } => {
      let mut options = columns
        .as_deref()
        .map(ListOptions::columns)
        .unwrap_or_default();
      options.limit = limit;
      match entity {
        Namespace::Bahan => print_json(&store.get_all::<Bahan>(&options).await?),
        Namespace::Produk => print_json(&store.get_all::<Produk>(&options).await?),
        Namespace::Keuangan => {
          let filter = TransaksiFilter {
            kategori,
            tipe: tipe.map(TransactionKind::from),
            from,
            to,
          };
          print_json(&store.get_transaksi(&filter, &options).await?)
        }
      }
    }
    Command::Get { entity, id } => match entity {
      Namespace::Bahan => print_json(&store.get_by_id::<Bahan>(id).await?),
      Namespace::Produk => print_json(&store.get_by_id::<Produk>(id).await?),
      Namespace::Keuangan => print_json(&store.get_transaksi_by_id(id).await?),
    },
    Command::Create { entity, json } => match entity {
      Namespace::Bahan => print_json(&create::<Bahan>(store, &json).await?),
      Namespace::Produk => print_json(&create::<Produk>(store, &json).await?),
      Namespace::Keuangan => print_json(&create::<Transaksi>(store, &json).await?),
    },
    Command::Update { entity, id, json } => match entity {
      Namespace::Bahan => print_json(&update::<Bahan>(store, id, &json).await?),
      Namespace::Produk => print_json(&update::<Produk>(store, id, &json).await?),
      Namespace::Keuangan => print_json(&update::<Transaksi>(store, id, &json).await?),
    },
    Command::Delete { entity, id } => {
      match entity {
        Namespace::Bahan => store.delete::<Bahan>(id).await?,
        Namespace::Produk => store.delete::<Produk>(id).await?,
        Namespace::Keuangan => store.delete::<Transaksi>(id).await?,
      }
      print_json(&serde_json::json!({ "deleted": id }))
    }
    Command::Stok { entity, id, delta } => match entity {
      Namespace::Bahan => print_json(&stok::<Bahan>(store, id, delta).await?),
      Namespace::Produk => print_json(&stok::<Produk>(store, id, delta).await?),
      Namespace::Keuangan => Err(eyre!("Transactions have no stock level")),
    },
    Command::Summary { kind } => match kind {
      SummaryKind::Kategori => print_json(&store.pengeluaran_by_kategori().await?),
      SummaryKind::Bulanan => print_json(&store.summary_bulanan().await?),
      SummaryKind::Harian => print_json(&store.summary_harian().await?),
    },
    Command::Critical => print_json(&store.load_critical_data().await),
    Command::Prefetch => {
      store.prefetch_common_data().await;
      Ok(())
    }
    Command::Clear { key } => {
      store.clear_cache(key.as_deref());
      Ok(())
    }
    Command::Shell { .. } => Err(eyre!("Shell commands do not use the data store")),
  }
}

async fn create<T>(store: &Store, json: &str) -> Result<T>
where
  T: Entity,
  T::Draft: DeserializeOwned,
{
  let draft: T::Draft = parse_json(json)?;
  Ok(store.create::<T>(&draft).await?)
}

async fn update<T>(store: &Store, id: i64, json: &str) -> Result<T>
where
  T: Entity,
  T::Patch: DeserializeOwned,
{
  let patch: T::Patch = parse_json(json)?;
  Ok(store.update::<T>(id, &patch).await?)
}

async fn stok<T: Stocked>(store: &Store, id: i64, delta: f64) -> Result<T> {
  Ok(store.update_stok::<T>(id, delta).await?)
}

fn parse_json<T: DeserializeOwned>(json: &str) -> Result<T> {
  serde_json::from_str(json).map_err(|e| eyre!("Invalid JSON: {}", e))
}

async fn run_shell(config: &Config, command: ShellCommand) -> Result<()> {
  let origin = config
    .shell
    .origin
    .as_deref()
    .ok_or_else(|| eyre!("shell.origin is not configured"))?;
  let origin = Url::parse(origin).map_err(|e| eyre!("Invalid shell origin {}: {}", origin, e))?;
  let buckets = SqliteBuckets::open_at(&shell_db_path(config)?)?;
  let network = HttpAssetNetwork::new()?;
  let version = config.shell.version.clone();

  match command {
    ShellCommand::Install => {
      let shell = ShellCache::new(buckets, network, origin, version);
      let cached = shell.install().await?;
      print_json(&serde_json::json!({ "version": shell.version(), "cached": cached }))
    }
    ShellCommand::Activate => {
      let shell = ShellCache::new(buckets, network, origin, version);
      shell.install().await?;
      let deleted = shell.activate().await?;
      print_json(&serde_json::json!({ "version": shell.version(), "deleted": deleted }))
    }
    ShellCommand::Fetch { url, navigate } => {
      let shell = ShellCache::restore(buckets, network, origin, version)?;
      let request = if navigate {
        AssetRequest::navigate(url)
      } else {
        AssetRequest::get(url)
      };
      let outcome = match shell.fetch(&request).await {
        FetchOutcome::Passthrough => serde_json::json!({ "outcome": "passthrough" }),
        FetchOutcome::Respond(None) => serde_json::json!({ "outcome": "failed" }),
        FetchOutcome::Respond(Some(response)) => serde_json::json!({
          "outcome": "respond",
          "status": response.status,
          "content_type": response.content_type,
          "bytes": response.body.len(),
        }),
      };
      print_json(&outcome)
    }
  }
}

/// Shell buckets live next to the data cache.
fn shell_db_path(config: &Config) -> Result<PathBuf> {
  let cache_path = match &config.cache.path {
    Some(path) => path.clone(),
    None => default_db_path()?,
  };
  Ok(
    cache_path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .join("shell.db"),
  )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", out);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_list_command() {
    let args = Args::parse_from([
      "stokify",
      "--offline",
      "list",
      "keuangan",
      "--tipe",
      "pengeluaran",
      "--from",
      "2024-01-01",
    ]);
    assert!(args.offline);
    match args.command {
      Command::List {
        entity, tipe, from, ..
      } => {
        assert_eq!(entity, Namespace::Keuangan);
        assert!(matches!(tipe, Some(Kind::Pengeluaran)));
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 1, 1));
      }
      other => panic!("expected list command, got {other:?}"),
    }
  }

  #[test]
  fn parse_negative_stock_delta() {
    let args = Args::parse_from(["stokify", "stok", "bahan", "1", "-2.5"]);
    match args.command {
      Command::Stok { entity, id, delta } => {
        assert_eq!(entity, Namespace::Bahan);
        assert_eq!(id, 1);
        assert_eq!(delta, -2.5);
      }
      other => panic!("expected stok command, got {other:?}"),
    }
  }

  #[test]
  fn parse_entity_aliases() {
    let args = Args::parse_from(["stokify", "get", "materials", "3"]);
    assert!(matches!(
      args.command,
      Command::Get {
        entity: Namespace::Bahan,
        id: 3
      }
    ));
  }

  #[test]
  fn parse_shell_fetch() {
    let args = Args::parse_from([
      "stokify",
      "shell",
      "fetch",
      "https://stokify.app/",
      "--navigate",
    ]);
    match args.command {
      Command::Shell {
        command: ShellCommand::Fetch { url, navigate },
      } => {
        assert_eq!(url.as_str(), "https://stokify.app/");
        assert!(navigate);
      }
      other => panic!("expected shell fetch, got {other:?}"),
    }
  }
}

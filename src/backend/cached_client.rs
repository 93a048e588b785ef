//! Cached data store that wraps a [`Backend`] with transparent caching.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheLayer, FetchOptions, Mutation, Period, PersistentStore, Strategy};
use crate::error::{BackendError, Error, Result};

use super::cache::{
  expense_by_category_key, id_key, ids_key, list_key, summary_key, transaksi_key, Entity, Stocked,
};
use super::client::{Backend, Filter, SelectQuery};
use super::summary::{expense_by_category, period_totals};
use super::types::{
  Bahan, CategoryTotals, ListOptions, PeriodSummary, Produk, TransactionKind, Transaksi,
  TransaksiFilter,
};

/// Deferred network read handed to the cache layer.
type Fetcher<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// Columns and limit of the material list shown on the home screen.
fn critical_bahan() -> ListOptions {
  ListOptions::columns("id,nama,stok,satuan").limit(50)
}

/// Columns and limit of the product list shown on the home screen.
fn critical_produk() -> ListOptions {
  ListOptions::columns("id,nama,stok,satuan,harga").limit(50)
}

/// Data needed by the first screen, loaded in one go.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CriticalData {
  pub bahan: Option<Vec<Bahan>>,
  pub produk: Option<Vec<Produk>>,
  pub summary_bulanan: Option<PeriodSummary>,
  pub summary_harian: Option<PeriodSummary>,
}

/// Backend access with transparent caching and offline support.
///
/// Reads are deduplicated and served according to each entity's strategy;
/// writes require connectivity and are applied optimistically.
pub struct DataStore<B: Backend, S: PersistentStore> {
  backend: B,
  cache: CacheLayer<S>,
}

impl<B: Backend, S: PersistentStore + 'static> DataStore<B, S> {
  pub fn new(backend: B, cache: CacheLayer<S>) -> Self {
    Self { backend, cache }
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  // ==========================================================================
  // Generic entity access
  // ==========================================================================

  /// List `T` with stale-while-revalidate and the entity's stale time.
  pub async fn get_all<T: Entity>(&self, options: &ListOptions) -> Result<Vec<T>> {
    self.list::<T>(options, false).await
  }

  /// Fetch one `T`, preferring the network.
  pub async fn get_by_id<T: Entity>(&self, id: i64) -> Result<T> {
    let key = id_key::<T>(id).to_string();
    let backend = self.backend.clone();
    let fetcher = move || async move {
      let query = SelectQuery::new().filter(Filter::eq("id", id)).limit(Some(1));
      let rows = backend.select(T::table(), &query).await?;
      let row = rows.into_iter().next().ok_or_else(|| {
        Error::from(BackendError::with_status(
          404,
          format!("No {} row with id {}", T::table(), id),
        ))
      })?;
      decode(&id_key::<T>(id).to_string(), row)
    };

    self
      .cache
      .batch_request(&key, fetcher, self.cache.options(Strategy::NetworkFirst))
      .await
  }

  /// Fetch several `T` in one request. An empty id list touches nothing.
  pub async fn get_by_ids<T: Entity>(&self, ids: &[i64]) -> Result<Vec<T>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let key = ids_key::<T>(ids).to_string();
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let query = SelectQuery::new().filter(Filter::any_of("id", sorted));
    let fetcher = self.select_fetcher::<T>(&key, T::table(), query);

    self
      .cache
      .batch_request(&key, fetcher, self.cache.options(Strategy::StaleWhileRevalidate))
      .await
  }

  /// Create a record. Lists show it under a temporary id until the backend
  /// confirms, after which the namespace is re-fetched.
  pub async fn create<T: Entity>(&self, draft: &T::Draft) -> Result<T> {
    let record = encode(draft)?;
    let mutation = Mutation::create(T::NAMESPACE, record.clone(), self.cache.next_temp_id());
    let backend = self.backend.clone();

    self
      .cache
      .mutate(mutation, || async move {
        let stored = backend.insert(T::table(), record).await?;
        decode(T::table(), stored)
      })
      .await
  }

  pub async fn update<T: Entity>(&self, id: i64, patch: &T::Patch) -> Result<T> {
    let patch = encode(patch)?;
    let mutation = Mutation::update(T::NAMESPACE, id, patch.clone());
    let backend = self.backend.clone();

    self
      .cache
      .mutate(mutation, || async move {
        let stored = backend.update(T::table(), id, patch).await?;
        decode(T::table(), stored)
      })
      .await
  }

  pub async fn delete<T: Entity>(&self, id: i64) -> Result<()> {
    let mutation = Mutation::delete(T::NAMESPACE, id);
    let backend = self.backend.clone();

    self
      .cache
      .mutate(mutation, || async move { backend.delete(T::table(), id).await })
      .await
  }

  /// Add `delta` to the stock of `T` with `id`.
  pub async fn update_stok<T: Stocked>(&self, id: i64, delta: f64) -> Result<T> {
    let current: T = self.get_by_id(id).await?;
    let patch = T::stock_patch(current.stok() + delta);
    self.update::<T>(id, &patch).await
  }

  pub async fn update_stok_bahan(&self, id: i64, delta: f64) -> Result<Bahan> {
    self.update_stok::<Bahan>(id, delta).await
  }

  pub async fn update_stok_produk(&self, id: i64, delta: f64) -> Result<Produk> {
    self.update_stok::<Produk>(id, delta).await
  }

  // ==========================================================================
  // Finance
  // ==========================================================================

  /// Transactions matching `filter`, newest first.
  pub async fn get_transaksi(
    &self,
    filter: &TransaksiFilter,
    options: &ListOptions,
  ) -> Result<Vec<Transaksi>> {
    let key = transaksi_key(filter, options).to_string();
    let mut query = list_query::<Transaksi>(options);
    if let Some(kategori) = &filter.kategori {
      query = query.filter(Filter::eq("kategori", kategori));
    }
    if let Some(tipe) = filter.tipe {
      query = query.filter(Filter::any_of("tipe", tipe.aliases()));
    }
    if let Some(from) = filter.from {
      query = query.filter(Filter::gte("tanggal", from));
    }
    if let Some(to) = filter.to {
      query = query.filter(Filter::lte("tanggal", to));
    }

    let fetcher = self.select_fetcher::<Transaksi>(&key, Transaksi::table(), query);
    self
      .cache
      .batch_request(&key, fetcher, list_fetch_options::<Transaksi>(false))
      .await
  }

  pub async fn get_transaksi_by_id(&self, id: i64) -> Result<Transaksi> {
    self.get_by_id::<Transaksi>(id).await
  }

  /// Expense totals per category (`lainnya` for uncategorized).
  pub async fn pengeluaran_by_kategori(&self) -> Result<CategoryTotals> {
    let key = expense_by_category_key().to_string();
    let fetcher = self.expense_fetcher();
    self
      .cache
      .batch_request(&key, fetcher, self.cache.options(Strategy::StaleWhileRevalidate))
      .await
  }

  /// Income and expense totals per `YYYY-MM`.
  pub async fn summary_bulanan(&self) -> Result<PeriodSummary> {
    self.summary(Period::Monthly, false).await
  }

  /// Income and expense totals per `YYYY-MM-DD`.
  pub async fn summary_harian(&self) -> Result<PeriodSummary> {
    self.summary(Period::Daily, false).await
  }

  // ==========================================================================
  // Batch operations
  // ==========================================================================

  /// Load the home screen's lists and summaries concurrently.
  ///
  /// A failing part is logged and left as `None`.
  pub async fn load_critical_data(&self) -> CriticalData {
    self.critical_data(false).await
  }

  /// Like [`Self::load_critical_data`], but bypassing cached values.
  pub async fn refresh_critical_data(&self) -> CriticalData {
    self.critical_data(true).await
  }

  /// Warm the cache with data most screens need. Failures are ignored.
  pub async fn prefetch_common_data(&self) {
    let bahan_options = critical_bahan();
    let bahan_key = list_key::<Bahan>(&bahan_options).to_string();
    let bahan_fetcher =
      self.select_fetcher::<Bahan>(&bahan_key, Bahan::table(), list_query::<Bahan>(&bahan_options));

    let produk_options = critical_produk();
    let produk_key = list_key::<Produk>(&produk_options).to_string();
    let produk_fetcher = self.select_fetcher::<Produk>(
      &produk_key,
      Produk::table(),
      list_query::<Produk>(&produk_options),
    );

    let kategori_key = expense_by_category_key().to_string();

    tokio::join!(
      self
        .cache
        .prefetch(&bahan_key, bahan_fetcher, list_fetch_options::<Bahan>(false)),
      self
        .cache
        .prefetch(&produk_key, produk_fetcher, list_fetch_options::<Produk>(false)),
      self.cache.prefetch(
        &kategori_key,
        self.expense_fetcher(),
        self.cache.options(Strategy::StaleWhileRevalidate)
      ),
    );
  }

  /// Remove one key, or every data key when `key` is `None`.
  pub fn clear_cache(&self, key: Option<&str>) {
    self.cache.clear_cache(key);
  }

  /// Refresh critical data every time connectivity comes back.
  pub fn refresh_on_reconnect(&self) -> JoinHandle<()> {
    let store = self.clone();
    self.cache.connectivity().on_online(move || {
      let store = store.clone();
      async move {
        info!("connection restored, refreshing critical data");
        store.refresh_critical_data().await;
      }
    })
  }

  // ==========================================================================
  // Internals
  // ==========================================================================

  async fn list<T: Entity>(&self, options: &ListOptions, force: bool) -> Result<Vec<T>> {
    let key = list_key::<T>(options).to_string();
    let fetcher = self.select_fetcher::<T>(&key, T::table(), list_query::<T>(options));
    self
      .cache
      .batch_request(&key, fetcher, list_fetch_options::<T>(force))
      .await
  }

  async fn summary(&self, period: Period, force: bool) -> Result<PeriodSummary> {
    let key = summary_key(period).to_string();
    let backend = self.backend.clone();
    let fetcher: Fetcher<PeriodSummary> = Box::new(move || {
      async move {
        let query = SelectQuery::new().columns(Some("tanggal,tipe,jumlah"));
        let rows = backend.select(Transaksi::table(), &query).await?;
        Ok(period_totals(&rows, period))
      }
      .boxed()
    });

    let mut options = self.cache.options(Strategy::StaleWhileRevalidate);
    if force {
      options = options.force_refresh();
    }
    self.cache.batch_request(&key, fetcher, options).await
  }

  async fn critical_data(&self, force: bool) -> CriticalData {
    let bahan_options = critical_bahan();
    let produk_options = critical_produk();
    let (bahan, produk, bulanan, harian) = tokio::join!(
      self.list::<Bahan>(&bahan_options, force),
      self.list::<Produk>(&produk_options, force),
      self.summary(Period::Monthly, force),
      self.summary(Period::Daily, force),
    );

    CriticalData {
      bahan: ok_or_warn("bahan", bahan),
      produk: ok_or_warn("produk", produk),
      summary_bulanan: ok_or_warn("summary bulanan", bulanan),
      summary_harian: ok_or_warn("summary harian", harian),
    }
  }

  fn select_fetcher<T>(&self, key: &str, table: &'static str, query: SelectQuery) -> Fetcher<Vec<T>>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let backend = self.backend.clone();
    let key = key.to_string();
    Box::new(move || {
      async move {
        let rows = backend.select(table, &query).await?;
        decode(&key, Value::Array(rows))
      }
      .boxed()
    })
  }

  fn expense_fetcher(&self) -> Fetcher<CategoryTotals> {
    let backend = self.backend.clone();
    Box::new(move || {
      async move {
        let query = SelectQuery::new()
          .columns(Some("kategori,jumlah,tipe"))
          .filter(Filter::any_of("tipe", TransactionKind::Pengeluaran.aliases()));
        let rows = backend.select(Transaksi::table(), &query).await?;
        Ok(expense_by_category(&rows))
      }
      .boxed()
    })
  }
}

impl<B: Backend, S: PersistentStore> Clone for DataStore<B, S> {
  fn clone(&self) -> Self {
    Self {
      backend: self.backend.clone(),
      cache: self.cache.clone(),
    }
  }
}

fn list_query<T: Entity>(options: &ListOptions) -> SelectQuery {
  SelectQuery::new()
    .columns(options.columns.as_deref())
    .order(T::ORDER_BY)
    .limit(options.limit.or(T::DEFAULT_LIMIT))
}

fn list_fetch_options<T: Entity>(force: bool) -> FetchOptions {
  let options = FetchOptions::new(Strategy::StaleWhileRevalidate).with_stale_time(T::list_stale_time());
  if force {
    options.force_refresh()
  } else {
    options
  }
}

fn ok_or_warn<T>(what: &str, result: Result<T>) -> Option<T> {
  match result {
    Ok(data) => Some(data),
    Err(err) => {
      warn!(what, error = %err, "failed to load critical data");
      None
    }
  }
}

fn encode<T: Serialize>(data: &T) -> Result<Value> {
  serde_json::to_value(data).map_err(|e| Error::Internal(format!("failed to encode record: {}", e)))
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| Error::Decode {
    key: key.to_string(),
    message: e.to_string(),
  })
}

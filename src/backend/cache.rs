//! Caching implementations for the domain types.

use chrono::Duration;
use serde::Serialize;

use crate::cache::{CacheKey, Cacheable, Namespace, Operation, Period};

use super::types::{
  Bahan, BahanPatch, ListOptions, NewBahan, NewProduk, NewTransaksi, Produk, ProdukPatch,
  Transaksi, TransaksiFilter, TransaksiPatch,
};

/// A record type stored in one backend table and cached under one namespace.
pub trait Entity: Cacheable {
  /// Fields sent when creating a record
  type Draft: Serialize + Send + Sync + 'static;
  /// Fields sent when updating a record
  type Patch: Serialize + Send + Sync + 'static;

  const NAMESPACE: Namespace;
  /// PostgREST `order` value for list reads
  const ORDER_BY: &'static str;
  /// Row limit applied when the caller gives none
  const DEFAULT_LIMIT: Option<u32> = None;

  /// How long a list read stays fresh.
  fn list_stale_time() -> Duration;

  fn id(&self) -> i64;

  /// Backend table name.
  fn table() -> &'static str {
    Self::NAMESPACE.as_str()
  }
}

/// Entities carrying a stock level.
pub trait Stocked: Entity {
  fn stok(&self) -> f64;

  /// Patch that sets the stock level to `stok`.
  fn stock_patch(stok: f64) -> Self::Patch;
}

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for Bahan {
  type Draft = NewBahan;
  type Patch = BahanPatch;

  const NAMESPACE: Namespace = Namespace::Bahan;
  const ORDER_BY: &'static str = "id.desc";

  fn list_stale_time() -> Duration {
    Duration::minutes(3)
  }

  fn id(&self) -> i64 {
    self.id
  }
}

impl Stocked for Bahan {
  fn stok(&self) -> f64 {
    self.stok
  }

  fn stock_patch(stok: f64) -> BahanPatch {
    BahanPatch {
      stok: Some(stok),
      ..Default::default()
    }
  }
}

impl Entity for Produk {
  type Draft = NewProduk;
  type Patch = ProdukPatch;

  const NAMESPACE: Namespace = Namespace::Produk;
  const ORDER_BY: &'static str = "id.desc";

  fn list_stale_time() -> Duration {
    Duration::minutes(3)
  }

  fn id(&self) -> i64 {
    self.id
  }
}

impl Stocked for Produk {
  fn stok(&self) -> f64 {
    self.stok
  }

  fn stock_patch(stok: f64) -> ProdukPatch {
    ProdukPatch {
      stok: Some(stok),
      ..Default::default()
    }
  }
}

impl Entity for Transaksi {
  type Draft = NewTransaksi;
  type Patch = TransaksiPatch;

  const NAMESPACE: Namespace = Namespace::Keuangan;
  const ORDER_BY: &'static str = "tanggal.desc";
  const DEFAULT_LIMIT: Option<u32> = Some(1000);

  fn list_stale_time() -> Duration {
    Duration::minutes(2)
  }

  fn id(&self) -> i64 {
    self.id
  }
}

// ============================================================================
// Query keys
// ============================================================================

/// Filters and list options hashed together into one key fragment.
#[derive(Serialize)]
struct TransaksiQuery<'a> {
  #[serde(flatten)]
  filter: &'a TransaksiFilter,
  #[serde(flatten)]
  options: &'a ListOptions,
}

/// Key of a list read of `T` with `options`.
pub fn list_key<T: Entity>(options: &ListOptions) -> CacheKey {
  CacheKey::new(T::NAMESPACE, Operation::All).with_options(options)
}

pub fn id_key<T: Entity>(id: i64) -> CacheKey {
  CacheKey::new(T::NAMESPACE, Operation::Id(id))
}

pub fn ids_key<T: Entity>(ids: &[i64]) -> CacheKey {
  CacheKey::new(T::NAMESPACE, Operation::ids(ids))
}

/// Key of a filtered transaction list.
pub fn transaksi_key(filter: &TransaksiFilter, options: &ListOptions) -> CacheKey {
  CacheKey::new(Namespace::Keuangan, Operation::All)
    .with_options(&TransaksiQuery { filter, options })
}

pub fn expense_by_category_key() -> CacheKey {
  CacheKey::new(Namespace::Keuangan, Operation::ExpenseByCategory)
}

pub fn summary_key(period: Period) -> CacheKey {
  CacheKey::new(Namespace::Keuangan, Operation::Summary(period))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::types::TransactionKind;
  use chrono::NaiveDate;

  #[test]
  fn test_default_list_keys_are_plain() {
    assert_eq!(list_key::<Bahan>(&ListOptions::default()).to_string(), "bahan:all");
    assert_eq!(
      transaksi_key(&TransaksiFilter::default(), &ListOptions::default()).to_string(),
      "keuangan:all"
    );
    assert_eq!(id_key::<Produk>(4).to_string(), "produk:id:4");
  }

  #[test]
  fn test_column_order_does_not_change_key() {
    let a = list_key::<Bahan>(&ListOptions::columns("id,nama,stok").limit(50));
    let b = list_key::<Bahan>(&ListOptions::columns("stok,nama,id").limit(50));
    assert_eq!(a, b);
    assert_ne!(a, list_key::<Bahan>(&ListOptions::columns("id,nama,stok")));
  }

  #[test]
  fn test_transaksi_filters_change_key() {
    let january = TransaksiFilter {
      from: NaiveDate::from_ymd_opt(2024, 1, 1),
      to: NaiveDate::from_ymd_opt(2024, 1, 31),
      ..Default::default()
    };
    let expenses = TransaksiFilter {
      tipe: Some(TransactionKind::Pengeluaran),
      ..Default::default()
    };
    let options = ListOptions::default();

    let a = transaksi_key(&january, &options).to_string();
    let b = transaksi_key(&expenses, &options).to_string();
    assert!(a.starts_with("keuangan:all:"));
    assert_ne!(a, b);
    assert_eq!(a, transaksi_key(&january.clone(), &options).to_string());
  }

  #[test]
  fn test_ids_key_ignores_order() {
    assert_eq!(ids_key::<Bahan>(&[2, 1]), ids_key::<Bahan>(&[1, 2, 2]));
  }

  #[test]
  fn test_stock_patch_sets_only_stok() {
    let patch = Bahan::stock_patch(11.0);
    assert_eq!(patch.stok, Some(11.0));
    assert!(patch.nama.is_none());
  }
}

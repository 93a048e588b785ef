//! Domain data access: backend client, record types and the cached store.

mod cache;
mod cached_client;
mod client;
mod summary;
mod types;

pub use cache::{Entity, Stocked};
pub use cached_client::{CriticalData, DataStore};
pub use client::{Backend, Credentials, Filter, RestBackend, SelectQuery};
pub use summary::{expense_by_category, period_key, period_totals, UNCATEGORIZED};
pub use types::{
  Bahan, BahanPatch, CategoryTotals, ListOptions, NewBahan, NewProduk, NewTransaksi,
  PeriodSummary, PeriodTotals, Produk, ProdukPatch, TransactionKind, Transaksi, TransaksiFilter,
  TransaksiPatch,
};

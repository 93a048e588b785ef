use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Material (raw ingredient) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bahan {
  pub id: i64,
  #[serde(default)]
  pub nama: String,
  #[serde(default)]
  pub stok: f64,
  #[serde(default)]
  pub satuan: Option<String>,
  #[serde(default)]
  pub harga_beli_rata: Option<f64>,
  #[serde(default)]
  pub supplier: Option<String>,
  #[serde(default)]
  pub gambar: Option<String>,
}

/// Fields for a new material
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBahan {
  pub nama: String,
  #[serde(default)]
  pub stok: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub satuan: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub harga_beli_rata: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub supplier: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gambar: Option<String>,
}

/// Changed fields of a material; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BahanPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nama: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stok: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub satuan: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub harga_beli_rata: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub supplier: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gambar: Option<String>,
}

/// Product record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Produk {
  pub id: i64,
  #[serde(default)]
  pub nama: String,
  #[serde(default)]
  pub stok: f64,
  #[serde(default)]
  pub satuan: Option<String>,
  #[serde(default)]
  pub harga: Option<f64>,
  /// Recipe as stored by the backend (free-form JSON)
  #[serde(default)]
  pub resep: Option<serde_json::Value>,
  #[serde(default)]
  pub gambar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProduk {
  pub nama: String,
  #[serde(default)]
  pub stok: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub satuan: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub harga: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resep: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gambar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProdukPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nama: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stok: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub satuan: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub harga: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resep: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gambar: Option<String>,
}

/// Direction of a finance transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
  #[serde(rename = "pemasukan", alias = "masuk")]
  Pemasukan,
  #[serde(rename = "pengeluaran", alias = "keluar")]
  Pengeluaran,
}

impl TransactionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pemasukan => "pemasukan",
      Self::Pengeluaran => "pengeluaran",
    }
  }

  /// Parse a stored `tipe` value, legacy names included.
  pub fn parse(tipe: &str) -> Option<Self> {
    match tipe {
      "pemasukan" | "masuk" => Some(Self::Pemasukan),
      "pengeluaran" | "keluar" => Some(Self::Pengeluaran),
      _ => None,
    }
  }

  /// Every stored name for this kind.
  pub fn aliases(self) -> &'static [&'static str] {
    match self {
      Self::Pemasukan => &["pemasukan", "masuk"],
      Self::Pengeluaran => &["pengeluaran", "keluar"],
    }
  }
}

/// Finance transaction record (`keuangan` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaksi {
  pub id: i64,
  /// Date (`YYYY-MM-DD`) or timestamp (RFC 3339)
  #[serde(default)]
  pub tanggal: String,
  /// `None` when the stored value is missing or not a known kind
  #[serde(default, deserialize_with = "lenient_kind")]
  pub tipe: Option<TransactionKind>,
  #[serde(default)]
  pub kategori: Option<String>,
  #[serde(default)]
  pub jumlah: f64,
  #[serde(default)]
  pub keterangan: Option<String>,
}

fn lenient_kind<'de, D>(deserializer: D) -> Result<Option<TransactionKind>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match serde_json::Value::deserialize(deserializer)? {
    serde_json::Value::String(tipe) => TransactionKind::parse(&tipe),
    _ => None,
  })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaksi {
  pub tanggal: String,
  pub tipe: TransactionKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kategori: Option<String>,
  pub jumlah: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub keterangan: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransaksiPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tanggal: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tipe: Option<TransactionKind>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kategori: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub jumlah: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub keterangan: Option<String>,
}

/// Filters for transaction lists. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransaksiFilter {
  pub kategori: Option<String>,
  pub tipe: Option<TransactionKind>,
  pub from: Option<NaiveDate>,
  pub to: Option<NaiveDate>,
}

/// Column selection and row limit for list reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
  /// Comma-separated column list; `None` selects everything
  pub columns: Option<String>,
  pub limit: Option<u32>,
}

impl ListOptions {
  /// Select only `columns` (order and whitespace do not matter).
  pub fn columns(columns: &str) -> Self {
    Self {
      columns: normalize_columns(columns),
      limit: None,
    }
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// Canonical column list: sorted, deduplicated, `*` meaning all.
fn normalize_columns(columns: &str) -> Option<String> {
  let mut cols: Vec<&str> = columns
    .split(',')
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .collect();
  if cols.is_empty() || cols.contains(&"*") {
    return None;
  }
  cols.sort_unstable();
  cols.dedup();
  Some(cols.join(","))
}

/// Income and expense totals for one period
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
  pub income_total: f64,
  pub expense_total: f64,
}

/// Expense totals keyed by category
pub type CategoryTotals = BTreeMap<String, f64>;

/// Totals keyed by `YYYY-MM` or `YYYY-MM-DD`
pub type PeriodSummary = BTreeMap<String, PeriodTotals>;

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_transaction_kind_accepts_legacy_names() {
    let masuk: TransactionKind = serde_json::from_value(json!("masuk")).unwrap();
    let keluar: TransactionKind = serde_json::from_value(json!("keluar")).unwrap();
    assert_eq!(masuk, TransactionKind::Pemasukan);
    assert_eq!(keluar, TransactionKind::Pengeluaran);
    assert_eq!(
      serde_json::to_value(TransactionKind::Pengeluaran).unwrap(),
      json!("pengeluaran")
    );
  }

  #[test]
  fn test_transaksi_tolerates_unknown_tipe() {
    let rows: Vec<Transaksi> = serde_json::from_value(json!([
      {"id": 1, "tanggal": "2024-01-05", "tipe": "masuk", "jumlah": 1},
      {"id": 2, "tanggal": "2024-01-06", "tipe": null, "jumlah": 2},
      {"id": 3, "tanggal": "2024-01-07", "tipe": "transfer", "jumlah": 3},
      {"id": 4, "tanggal": "2024-01-08", "tipe": 7, "jumlah": 4},
      {"id": 5, "tanggal": "2024-01-09", "jumlah": 5}
    ]))
    .unwrap();

    assert_eq!(rows[0].tipe, Some(TransactionKind::Pemasukan));
    assert!(rows[1..].iter().all(|row| row.tipe.is_none()));
  }

  #[test]
  fn test_partial_columns_decode() {
    let bahan: Bahan = serde_json::from_value(json!({"id": 3, "stok": 2.5})).unwrap();
    assert_eq!(bahan.id, 3);
    assert_eq!(bahan.stok, 2.5);
    assert!(bahan.nama.is_empty());
  }

  #[test]
  fn test_columns_are_canonical() {
    assert_eq!(
      ListOptions::columns(" stok,id , nama,id"),
      ListOptions::columns("id,nama,stok")
    );
    assert_eq!(ListOptions::columns("*").columns, None);
  }

  #[test]
  fn test_patch_skips_unset_fields() {
    let patch = BahanPatch {
      stok: Some(11.0),
      ..Default::default()
    };
    assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"stok": 11.0}));
  }

  #[test]
  fn test_period_totals_shape() {
    let totals = PeriodTotals {
      income_total: 5.0,
      expense_total: 2.0,
    };
    assert_eq!(
      serde_json::to_value(totals).unwrap(),
      json!({"incomeTotal": 5.0, "expenseTotal": 2.0})
    );
  }
}

//! Client-side finance aggregates.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::cache::Period;

use super::types::{CategoryTotals, PeriodSummary, TransactionKind};

/// Category used for expenses recorded without one.
pub const UNCATEGORIZED: &str = "lainnya";

/// The columns aggregation reads from a transaction row.
#[derive(Debug, Default, Deserialize)]
struct Row {
  #[serde(default)]
  tanggal: Option<String>,
  #[serde(default)]
  tipe: Option<String>,
  #[serde(default)]
  kategori: Option<String>,
  #[serde(default, deserialize_with = "lenient_amount")]
  jumlah: f64,
}

/// Amounts arrive as numbers, numeric strings or null.
fn lenient_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(match value {
    Value::Number(n) => n.as_f64().unwrap_or(0.0),
    Value::String(s) => s.trim().parse().unwrap_or(0.0),
    _ => 0.0,
  })
}

fn rows(records: &[Value]) -> impl Iterator<Item = Row> + '_ {
  records
    .iter()
    .filter_map(|record| serde_json::from_value(record.clone()).ok())
}

/// Expense totals per category. Income rows are ignored.
pub fn expense_by_category(records: &[Value]) -> CategoryTotals {
  let mut totals = CategoryTotals::new();
  for row in rows(records) {
    let kind = row.tipe.as_deref().and_then(TransactionKind::parse);
    if kind != Some(TransactionKind::Pengeluaran) {
      continue;
    }
    let kategori = row
      .kategori
      .filter(|k| !k.is_empty())
      .unwrap_or_else(|| UNCATEGORIZED.to_string());
    *totals.entry(kategori).or_insert(0.0) += row.jumlah;
  }
  totals
}

/// Income and expense totals per month or per day.
///
/// Rows whose date cannot be parsed are skipped.
pub fn period_totals(records: &[Value], period: Period) -> PeriodSummary {
  let mut summary = PeriodSummary::new();
  for row in rows(records) {
    let Some(date) = row.tanggal.as_deref().and_then(parse_date) else {
      debug!(tanggal = ?row.tanggal, "skipping transaction with unparseable date");
      continue;
    };
    let bucket = summary.entry(period_key(date, period)).or_default();
    match row.tipe.as_deref().and_then(TransactionKind::parse) {
      Some(TransactionKind::Pemasukan) => bucket.income_total += row.jumlah,
      Some(TransactionKind::Pengeluaran) => bucket.expense_total += row.jumlah,
      None => {}
    }
  }
  summary
}

/// Bucket label: `YYYY-MM` or `YYYY-MM-DD`.
pub fn period_key(date: NaiveDate, period: Period) -> String {
  match period {
    Period::Monthly => date.format("%Y-%m").to_string(),
    Period::Daily => date.format("%Y-%m-%d").to_string(),
  }
}

/// Parse a `tanggal` value: an RFC 3339 timestamp (bucketed in UTC) or a
/// plain date, optionally followed by a time.
fn parse_date(tanggal: &str) -> Option<NaiveDate> {
  if let Ok(ts) = DateTime::parse_from_rfc3339(tanggal) {
    return Some(ts.naive_utc().date());
  }
  let date_part = tanggal.get(..10).unwrap_or(tanggal);
  NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn records() -> Vec<Value> {
    vec![
      json!({"tanggal": "2024-01-05", "tipe": "pemasukan", "kategori": "penjualan", "jumlah": 500000}),
      json!({"tanggal": "2024-01-05", "tipe": "pengeluaran", "kategori": "bahan baku", "jumlah": 120000}),
      json!({"tanggal": "2024-01-20", "tipe": "keluar", "kategori": null, "jumlah": "30000"}),
      json!({"tanggal": "2024-02-01T08:30:00+00:00", "tipe": "masuk", "jumlah": 75000}),
      json!({"tanggal": "2024-02-03", "tipe": "pengeluaran", "kategori": "", "jumlah": null}),
    ]
  }

  #[test]
  fn test_expense_by_category() {
    let totals = expense_by_category(&records());
    assert_eq!(totals.len(), 2);
    assert_eq!(totals["bahan baku"], 120000.0);
    assert_eq!(totals[UNCATEGORIZED], 30000.0);
  }

  #[test]
  fn test_monthly_totals() {
    let summary = period_totals(&records(), Period::Monthly);
    assert_eq!(
      summary.keys().cloned().collect::<Vec<_>>(),
      vec!["2024-01", "2024-02"]
    );
    assert_eq!(summary["2024-01"].income_total, 500000.0);
    assert_eq!(summary["2024-01"].expense_total, 150000.0);
    assert_eq!(summary["2024-02"].income_total, 75000.0);
    assert_eq!(summary["2024-02"].expense_total, 0.0);
  }

  #[test]
  fn test_daily_totals() {
    let summary = period_totals(&records(), Period::Daily);
    assert_eq!(summary.len(), 4);
    assert_eq!(summary["2024-01-05"].income_total, 500000.0);
    assert_eq!(summary["2024-01-05"].expense_total, 120000.0);
    assert_eq!(summary["2024-02-01"].income_total, 75000.0);
  }

  #[test]
  fn test_unparseable_dates_are_skipped() {
    let summary = period_totals(
      &[json!({"tanggal": "kemarin", "tipe": "pemasukan", "jumlah": 1})],
      Period::Monthly,
    );
    assert!(summary.is_empty());
  }
}

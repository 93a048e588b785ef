//! Typed cache keys.
//!
//! Keys render as `namespace:operation[:fragment]`. The namespace prefix stays
//! readable so a whole namespace can be evicted by prefix; query options are
//! folded into a fixed-length hash fragment.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the hex options fragment.
const FRAGMENT_LEN: usize = 16;

/// Logical grouping of keys belonging to one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
  /// Materials
  Bahan,
  /// Products
  Produk,
  /// Finance transactions
  Keuangan,
}

impl Namespace {
  pub const ALL: [Namespace; 3] = [Namespace::Bahan, Namespace::Produk, Namespace::Keuangan];

  /// Name used in keys and as the backend table name.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Bahan => "bahan",
      Self::Produk => "produk",
      Self::Keuangan => "keuangan",
    }
  }

  /// Prefix shared by every key in this namespace.
  pub fn prefix(self) -> String {
    format!("{}:", self.as_str())
  }

  /// Key of the single-entity entry for `id`.
  pub fn id_key(self, id: i64) -> String {
    CacheKey::new(self, Operation::Id(id)).to_string()
  }
}

impl fmt::Display for Namespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Namespace {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "bahan" | "material" | "materials" => Ok(Self::Bahan),
      "produk" | "product" | "products" => Ok(Self::Produk),
      "keuangan" | "transaksi" | "transactions" => Ok(Self::Keuangan),
      other => Err(format!("unknown namespace: {}", other)),
    }
  }
}

/// Period granularity for finance summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
  /// `YYYY-MM` buckets
  Monthly,
  /// `YYYY-MM-DD` buckets
  Daily,
}

impl Period {
  fn as_str(self) -> &'static str {
    match self {
      Self::Monthly => "bulanan",
      Self::Daily => "harian",
    }
  }
}

/// What a key is asking for within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
  /// Full list
  All,
  /// Single entity by id
  Id(i64),
  /// Several entities by id; order and duplicates are irrelevant
  Ids(Vec<i64>),
  /// Expense totals per category
  ExpenseByCategory,
  /// Income/expense totals per period
  Summary(Period),
}

impl Operation {
  /// Build an `Ids` operation with the id list canonicalized.
  pub fn ids(ids: &[i64]) -> Self {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    Self::Ids(ids)
  }

  /// Whether entries under this operation hold a list of records.
  pub fn is_list(&self) -> bool {
    matches!(self, Self::All | Self::Ids(_))
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::All => f.write_str("all"),
      Self::Id(id) => write!(f, "id:{}", id),
      Self::Ids(ids) => {
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        let joined: Vec<String> = sorted.iter().map(|id| id.to_string()).collect();
        write!(f, "ids:{}", joined.join(","))
      }
      Self::ExpenseByCategory => f.write_str("pengeluaran:kategori"),
      Self::Summary(period) => write!(f, "summary:{}", period.as_str()),
    }
  }
}

/// A fully-typed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub namespace: Namespace,
  pub operation: Operation,
  fragment: Option<String>,
}

impl CacheKey {
  pub fn new(namespace: Namespace, operation: Operation) -> Self {
    Self {
      namespace,
      operation,
      fragment: None,
    }
  }

  /// Attach query options (filters, columns, limit).
  ///
  /// The options are serialized to canonical JSON and hashed, so equal options
  /// always produce the same key regardless of how they were built.
  pub fn with_options<O: Serialize>(mut self, options: &O) -> Self {
    self.fragment = options_fragment(options);
    self
  }

  pub fn fragment(&self) -> Option<&str> {
    self.fragment.as_deref()
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.namespace, self.operation)?;
    if let Some(fragment) = &self.fragment {
      write!(f, ":{}", fragment)?;
    }
    Ok(())
  }
}

impl From<&CacheKey> for String {
  fn from(key: &CacheKey) -> Self {
    key.to_string()
  }
}

/// Hash canonical JSON of `options`. `None` when the options serialize to
/// nothing (null or an empty object).
fn options_fragment<O: Serialize>(options: &O) -> Option<String> {
  // serde_json::Value keeps object keys sorted, which makes the encoding canonical
  let value = serde_json::to_value(options).ok()?;
  let is_empty = match &value {
    serde_json::Value::Null => true,
    serde_json::Value::Object(map) => map.values().all(|v| v.is_null()),
    _ => false,
  };
  if is_empty {
    return None;
  }

  let canonical = value.to_string();
  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  let digest = hex::encode(hasher.finalize());
  Some(digest[..FRAGMENT_LEN].to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  #[derive(Serialize)]
  struct Opts {
    kategori: Option<String>,
    limit: Option<u32>,
  }

  #[test]
  fn test_plain_keys() {
    assert_eq!(CacheKey::new(Namespace::Bahan, Operation::All).to_string(), "bahan:all");
    assert_eq!(Namespace::Produk.id_key(7), "produk:id:7");
    assert_eq!(
      CacheKey::new(Namespace::Keuangan, Operation::Summary(Period::Monthly)).to_string(),
      "keuangan:summary:bulanan"
    );
    assert_eq!(
      CacheKey::new(Namespace::Keuangan, Operation::ExpenseByCategory).to_string(),
      "keuangan:pengeluaran:kategori"
    );
  }

  #[test]
  fn test_ids_are_order_independent() {
    let a = CacheKey::new(Namespace::Bahan, Operation::ids(&[3, 1, 2, 1]));
    let b = CacheKey::new(Namespace::Bahan, Operation::ids(&[1, 2, 3]));
    assert_eq!(a.to_string(), b.to_string());
    assert_eq!(a.to_string(), "bahan:ids:1,2,3");
  }

  #[test]
  fn test_map_options_are_order_independent() {
    let mut first = BTreeMap::new();
    first.insert("to", "2024-02-01");
    first.insert("from", "2024-01-01");
    let mut second = BTreeMap::new();
    second.insert("from", "2024-01-01");
    second.insert("to", "2024-02-01");

    let a = CacheKey::new(Namespace::Keuangan, Operation::All).with_options(&first);
    let b = CacheKey::new(Namespace::Keuangan, Operation::All).with_options(&second);
    assert_eq!(a.to_string(), b.to_string());
    assert!(a.to_string().starts_with("keuangan:all:"));
    assert_eq!(a.fragment().map(str::len), Some(FRAGMENT_LEN));
  }

  #[test]
  fn test_distinct_options_do_not_collide() {
    let a = CacheKey::new(Namespace::Keuangan, Operation::All).with_options(&Opts {
      kategori: Some("bahan baku".to_string()),
      limit: None,
    });
    let b = CacheKey::new(Namespace::Keuangan, Operation::All).with_options(&Opts {
      kategori: Some("gaji".to_string()),
      limit: None,
    });
    assert_ne!(a.to_string(), b.to_string());
  }

  #[test]
  fn test_empty_options_keep_plain_key() {
    let key = CacheKey::new(Namespace::Bahan, Operation::All).with_options(&Opts {
      kategori: None,
      limit: None,
    });
    assert_eq!(key.to_string(), "bahan:all");
  }

  #[test]
  fn test_id_and_ids_do_not_collide() {
    let single = CacheKey::new(Namespace::Bahan, Operation::Id(1)).to_string();
    let many = CacheKey::new(Namespace::Bahan, Operation::ids(&[1])).to_string();
    assert_ne!(single, many);
  }

  #[test]
  fn test_namespace_parse() {
    assert_eq!("bahan".parse::<Namespace>(), Ok(Namespace::Bahan));
    assert_eq!("Transaksi".parse::<Namespace>(), Ok(Namespace::Keuangan));
    assert!("users".parse::<Namespace>().is_err());
  }
}

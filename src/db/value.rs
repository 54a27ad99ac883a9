//! Column Values
//!
//! The engine-neutral value of one column. Each engine maps it onto its
//! native representation and back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Marker stored by the key-value engine for an explicit NULL
pub const KV_NULL_MARKER: &str = ":null";

/// One column value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl DbValue {
    pub fn text(value: impl Into<String>) -> Self {
        DbValue::Text(value.into())
    }

    pub fn opt_text<T: AsRef<str>>(value: Option<T>) -> Self {
        value.map_or(DbValue::Null, |v| DbValue::Text(v.as_ref().to_string()))
    }

    pub fn opt_int(value: Option<i64>) -> Self {
        value.map_or(DbValue::Null, DbValue::Int)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    /// String form used by the key-value engine
    pub fn to_kv_string(&self) -> String {
        match self {
            DbValue::Null => KV_NULL_MARKER.to_string(),
            DbValue::Bool(b) => b.to_string(),
            DbValue::Int(i) => i.to_string(),
            DbValue::Text(s) => s.clone(),
        }
    }

    /// Inverse of [`DbValue::to_kv_string`]; typing is restored by the row
    /// reader
    pub fn from_kv_string(value: &str) -> Self {
        if value == KV_NULL_MARKER {
            DbValue::Null
        } else {
            DbValue::Text(value.to_string())
        }
    }

    /// JSON form used by the declarative engine
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DbValue::Null => serde_json::Value::Null,
            DbValue::Bool(b) => serde_json::Value::Bool(*b),
            DbValue::Int(i) => serde_json::Value::from(*i),
            DbValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Inverse of [`DbValue::to_json`]; `None` for arrays, objects and
    /// non-integral numbers
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(DbValue::Null),
            serde_json::Value::Bool(b) => Some(DbValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(DbValue::Int),
            serde_json::Value::String(s) => Some(DbValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => write!(f, "NULL"),
            DbValue::Bool(b) => write!(f, "{}", b),
            DbValue::Int(i) => write!(f, "{}", i),
            DbValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        DbValue::Text(value.to_string())
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        DbValue::Text(value)
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        DbValue::Int(value)
    }
}

impl From<bool> for DbValue {
    fn from(value: bool) -> Self {
        DbValue::Bool(value)
    }
}

/// Column name -> value, for one row
pub type RowValues = BTreeMap<&'static str, DbValue>;

/// Join the primary key values of a row, in table column order
pub fn key_string(table: &crate::db::table::Table, values: &RowValues) -> String {
    table
        .primary_key()
        .map(|c| values.get(c.name).map(|v| v.to_kv_string()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_strings() {
        assert_eq!(DbValue::Null.to_kv_string(), KV_NULL_MARKER);
        assert_eq!(DbValue::from_kv_string(KV_NULL_MARKER), DbValue::Null);
        assert_eq!(DbValue::Int(1000).to_kv_string(), "1000");
        assert_eq!(DbValue::from_kv_string(""), DbValue::Text(String::new()));
    }

    #[test]
    fn test_json_values() {
        let json = DbValue::Int(7000).to_json();
        assert_eq!(DbValue::from_json(&json), Some(DbValue::Int(7000)));
        assert_eq!(DbValue::from_json(&serde_json::json!(1.5)), None);
        assert_eq!(DbValue::from_json(&serde_json::json!([1])), None);
        assert_eq!(
            DbValue::from_json(&serde_json::json!("DRBD")),
            Some(DbValue::text("DRBD"))
        );
    }

    #[test]
    fn test_key_string() {
        use crate::db::table::vlm_dfns;

        let mut values = RowValues::new();
        values.insert(vlm_dfns::RESOURCE_NAME.name, DbValue::text("RSCA"));
        values.insert(vlm_dfns::SNAPSHOT_NAME.name, DbValue::text(""));
        values.insert(vlm_dfns::VLM_NR.name, DbValue::Int(0));
        values.insert(vlm_dfns::VLM_SIZE.name, DbValue::Int(1024));
        assert_eq!(key_string(&vlm_dfns::TABLE, &values), "RSCA::0");
    }
}

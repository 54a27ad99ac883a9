//! Raw Row Reader
//!
//! Wraps one backend row and offers typed, validating accessors. The
//! key-value engine hands every value over as text, so each integer and
//! boolean accessor also accepts the textual form.

use crate::db::table::{Column, Table};
use crate::db::value::DbValue;
use crate::domain::names::SnapshotName;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Value persisted in `SNAPSHOT_NAME` for rows that do not belong to a
/// snapshot
pub const NO_SNAPSHOT: &str = "";

/// One row as loaded from a backend engine
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    table: &'static Table,
    values: BTreeMap<String, DbValue>,
}

impl RawRow {
    pub fn new(table: &'static Table, values: BTreeMap<String, DbValue>) -> Self {
        Self { table, values }
    }

    pub fn table(&self) -> &'static Table {
        self.table
    }

    /// Raw value of a column; absent columns read as NULL
    pub fn get(&self, col: &Column) -> &DbValue {
        self.values.get(col.name).unwrap_or(&DbValue::Null)
    }

    /// Primary key values joined by `:`, for diagnostics
    pub fn key(&self) -> String {
        self.table
            .primary_key()
            .map(|c| self.get(c).to_kv_string())
            .collect::<Vec<_>>()
            .join(":")
    }

    fn parse_error(&self, col: &Column, value: &DbValue, reason: impl Display) -> Error {
        Error::Parse {
            table: self.table.name,
            column: col.name,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn missing(&self, col: &Column) -> Error {
        self.parse_error(col, &DbValue::Null, "value must not be NULL")
    }

    // =========================================================================
    // Strings
    // =========================================================================

    pub fn get_opt_string(&self, col: &Column) -> Result<Option<String>> {
        match self.get(col) {
            DbValue::Null => Ok(None),
            DbValue::Text(s) => Ok(Some(s.clone())),
            other => Err(self.parse_error(col, other, "expected text")),
        }
    }

    pub fn get_string(&self, col: &Column) -> Result<String> {
        self.get_opt_string(col)?.ok_or_else(|| self.missing(col))
    }

    // =========================================================================
    // Numbers and Booleans
    // =========================================================================

    pub fn get_opt_i64(&self, col: &Column) -> Result<Option<i64>> {
        match self.get(col) {
            DbValue::Null => Ok(None),
            DbValue::Int(i) => Ok(Some(*i)),
            value @ DbValue::Text(s) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|e| self.parse_error(col, value, e)),
            other => Err(self.parse_error(col, other, "expected an integer")),
        }
    }

    pub fn get_i64(&self, col: &Column) -> Result<i64> {
        self.get_opt_i64(col)?.ok_or_else(|| self.missing(col))
    }

    pub fn get_u64(&self, col: &Column) -> Result<u64> {
        let value = self.get_i64(col)?;
        u64::try_from(value).map_err(|_| self.parse_error(col, self.get(col), "must not be negative"))
    }

    pub fn get_bool(&self, col: &Column) -> Result<bool> {
        match self.get(col) {
            DbValue::Bool(b) => Ok(*b),
            DbValue::Int(0) => Ok(false),
            DbValue::Int(1) => Ok(true),
            value @ DbValue::Text(s) => match s.as_str() {
                "true" | "TRUE" | "1" => Ok(true),
                "false" | "FALSE" | "0" => Ok(false),
                _ => Err(self.parse_error(col, value, "expected a boolean")),
            },
            DbValue::Null => Err(self.missing(col)),
            other => Err(self.parse_error(col, other, "expected a boolean")),
        }
    }

    /// Parse the textual value through [`FromStr`]
    pub fn get_parsed<T>(&self, col: &Column) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.get_string(col)?;
        raw.parse::<T>()
            .map_err(|e| self.parse_error(col, self.get(col), e))
    }

    // =========================================================================
    // Domain Object Construction
    // =========================================================================

    /// Apply a validating constructor to a text column; NULL yields `None`
    pub fn build<T>(&self, col: &Column, ctor: impl FnOnce(&str) -> Result<T>) -> Result<Option<T>> {
        match self.get_opt_string(col)? {
            None => Ok(None),
            Some(raw) => ctor(&raw)
                .map(Some)
                .map_err(|e| self.parse_error(col, self.get(col), e)),
        }
    }

    pub fn build_required<T>(&self, col: &Column, ctor: impl FnOnce(&str) -> Result<T>) -> Result<T> {
        self.build(col, ctor)?.ok_or_else(|| self.missing(col))
    }

    /// Apply a validating constructor to an integer column; NULL yields `None`
    pub fn build_int<T>(&self, col: &Column, ctor: impl FnOnce(i64) -> Result<T>) -> Result<Option<T>> {
        match self.get_opt_i64(col)? {
            None => Ok(None),
            Some(raw) => ctor(raw)
                .map(Some)
                .map_err(|e| self.parse_error(col, self.get(col), e)),
        }
    }

    pub fn build_int_required<T>(&self, col: &Column, ctor: impl FnOnce(i64) -> Result<T>) -> Result<T> {
        self.build_int(col, ctor)?.ok_or_else(|| self.missing(col))
    }

    /// Read a `SNAPSHOT_NAME` key column. The empty sentinel and NULL both
    /// mean "not a snapshot".
    pub fn snapshot_name(&self, col: &Column) -> Result<Option<SnapshotName>> {
        match self.get_opt_string(col)? {
            None => Ok(None),
            Some(raw) if raw == NO_SNAPSHOT => Ok(None),
            Some(raw) => SnapshotName::new(&raw)
                .map(Some)
                .map_err(|e| self.parse_error(col, self.get(col), e)),
        }
    }
}

/// Persisted form of an optional snapshot name
pub fn snapshot_key(snap: Option<&SnapshotName>) -> DbValue {
    DbValue::text(snap.map_or(NO_SNAPSHOT, |s| s.key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table::{drbd_vlm_dfns, layer_rsc_ids, nodes};
    use crate::domain::names::{MinorNumber, NodeName};
    use assert_matches::assert_matches;

    fn row(table: &'static Table, values: &[(&str, DbValue)]) -> RawRow {
        RawRow::new(
            table,
            values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        )
    }

    #[test]
    fn test_text_and_typed_values_agree() {
        let sql = row(&drbd_vlm_dfns::TABLE, &[("VLM_MINOR_NR", DbValue::Int(1000))]);
        let kv = row(&drbd_vlm_dfns::TABLE, &[("VLM_MINOR_NR", DbValue::text("1000"))]);

        let minor = |r: &RawRow| r.build_int(&drbd_vlm_dfns::VLM_MINOR_NR, MinorNumber::new).unwrap();
        assert_eq!(minor(&sql), minor(&kv));
        assert_eq!(minor(&sql).map(|m| m.value()), Some(1000));
    }

    #[test]
    fn test_null_builds_none() {
        let r = row(&drbd_vlm_dfns::TABLE, &[("VLM_MINOR_NR", DbValue::Null)]);
        assert_eq!(r.build_int(&drbd_vlm_dfns::VLM_MINOR_NR, MinorNumber::new).unwrap(), None);
        assert_matches!(
            r.build_int_required(&drbd_vlm_dfns::VLM_MINOR_NR, MinorNumber::new),
            Err(Error::Parse { .. })
        );
    }

    #[test]
    fn test_parse_error_names_column_and_value() {
        let r = row(&nodes::TABLE, &[("NODE_NAME", DbValue::text("9-bad"))]);
        let err = r.build_required(&nodes::NODE_NAME, NodeName::new).unwrap_err();
        match err {
            Error::Parse { table, column, value, .. } => {
                assert_eq!(table, "NODES");
                assert_eq!(column, "NODE_NAME");
                assert_eq!(value, "9-bad");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_sentinel() {
        let r = row(&layer_rsc_ids::TABLE, &[("SNAPSHOT_NAME", DbValue::text(NO_SNAPSHOT))]);
        assert_eq!(r.snapshot_name(&layer_rsc_ids::SNAPSHOT_NAME).unwrap(), None);

        let r = row(&layer_rsc_ids::TABLE, &[("SNAPSHOT_NAME", DbValue::text("SNAP1"))]);
        let snap = r.snapshot_name(&layer_rsc_ids::SNAPSHOT_NAME).unwrap().unwrap();
        assert_eq!(snap.key(), "SNAP1");
        assert_eq!(snapshot_key(Some(&snap)), DbValue::text("SNAP1"));
        assert_eq!(snapshot_key(None), DbValue::text(""));
    }

    #[test]
    fn test_bool_forms() {
        for (value, expected) in [
            (DbValue::Bool(true), true),
            (DbValue::Int(0), false),
            (DbValue::text("true"), true),
            (DbValue::text("0"), false),
        ] {
            let r = row(&layer_rsc_ids::TABLE, &[("LAYER_RESOURCE_SUSPENDED", value)]);
            assert_eq!(r.get_bool(&layer_rsc_ids::LAYER_RESOURCE_SUSPENDED).unwrap(), expected);
        }
        let r = row(&layer_rsc_ids::TABLE, &[("LAYER_RESOURCE_SUSPENDED", DbValue::text("maybe"))]);
        assert!(r.get_bool(&layer_rsc_ids::LAYER_RESOURCE_SUSPENDED).is_err());
    }
}

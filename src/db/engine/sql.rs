//! Relational Engine
//!
//! SQLite through rusqlite. One table per entity kind with typed columns and
//! a composite primary key. The connection is blocking, so every call runs on
//! the blocking pool while holding the connection mutex.

use crate::db::engine::{DbEngine, WriteOp};
use crate::db::raw::RawRow;
use crate::db::table::{Table, ALL_TABLES};
use crate::db::value::{key_string, DbValue, RowValues};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const ENGINE: &str = "sql";

/// SQLite-backed engine
pub struct SqlEngine {
    conn: Arc<Mutex<Connection>>,
}

impl SqlEngine {
    /// Open (and create if needed) a database file
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&schema_sql())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Internal(format!("db task join failed: {}", e)))?
    }
}

// =============================================================================
// Schema
// =============================================================================

/// `CREATE TABLE` statement of one table
pub fn create_table_sql(table: &Table) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("    {} {}{}", c.name, c.sql_type.sql_name(), null)
        })
        .collect();
    let pk: Vec<&str> = table.primary_key().map(|c| c.name).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{},\n    PRIMARY KEY ({})\n);",
        table.name,
        columns.join(",\n"),
        pk.join(", ")
    )
}

fn schema_sql() -> String {
    ALL_TABLES
        .iter()
        .map(|t| create_table_sql(t))
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// Value Mapping
// =============================================================================

fn to_sql(value: &DbValue) -> Value {
    match value {
        DbValue::Null => Value::Null,
        DbValue::Bool(b) => Value::Integer(i64::from(*b)),
        DbValue::Int(i) => Value::Integer(*i),
        DbValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> DbValue {
    match value {
        ValueRef::Null => DbValue::Null,
        ValueRef::Integer(i) => DbValue::Int(i),
        // Not produced by this engine; surfaced as text so the row reader
        // reports a parse error on integer columns
        ValueRef::Real(f) => DbValue::Text(f.to_string()),
        ValueRef::Text(t) => DbValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => DbValue::Text(hex::encode(b)),
    }
}

fn where_clause(key: &RowValues, first_param: usize) -> String {
    key.keys()
        .enumerate()
        .map(|(idx, name)| format!("{} = ?{}", name, first_param + idx))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn apply(conn: &Connection, op: &WriteOp) -> Result<()> {
    match op {
        WriteOp::Upsert { table, values } => {
            let names: Vec<&str> = values.keys().copied().collect();
            let params: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                table.name,
                names.join(", "),
                params.join(", ")
            );
            conn.execute(&sql, params_from_iter(values.values().map(to_sql)))?;
        }
        WriteOp::Update {
            table,
            key,
            column,
            value,
        } => {
            let sql = format!(
                "UPDATE {} SET {} = ?1 WHERE {}",
                table.name,
                column.name,
                where_clause(key, 2)
            );
            let params = std::iter::once(to_sql(value)).chain(key.values().map(to_sql));
            let changed = conn.execute(&sql, params_from_iter(params))?;
            if changed == 0 {
                return Err(Error::NotFound {
                    kind: "row",
                    name: format!("{}[{}]", table.name, key_string(table, key)),
                });
            }
        }
        WriteOp::Delete { table, key } => {
            let sql = format!("DELETE FROM {} WHERE {}", table.name, where_clause(key, 1));
            conn.execute(&sql, params_from_iter(key.values().map(to_sql)))?;
        }
    }
    Ok(())
}

// =============================================================================
// DbEngine Implementation
// =============================================================================

#[async_trait]
impl DbEngine for SqlEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn load_all(&self, table: &'static Table) -> Result<Vec<RawRow>> {
        self.with_conn(move |conn| {
            let columns: Vec<&str> = table.columns.iter().map(|c| c.name).collect();
            let mut stmt = conn.prepare(&format!("SELECT {} FROM {}", columns.join(", "), table.name))?;
            let mut rows = stmt.query([])?;
            let mut result = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = BTreeMap::new();
                for (idx, column) in table.columns.iter().enumerate() {
                    values.insert(column.name.to_string(), from_sql(row.get_ref(idx)?));
                }
                result.push(RawRow::new(table, values));
            }
            Ok(result)
        })
        .await
    }

    async fn commit(&self, ops: &[WriteOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let ops = ops.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for op in &ops {
                apply(&tx, op)?;
            }
            tx.commit()?;
            debug!("Committed {} SQL statements", ops.len());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table::{drbd_vlm_dfns, props};
    use assert_matches::assert_matches;

    fn prop_row(value: &str) -> RowValues {
        let mut values = RowValues::new();
        values.insert(props::PROPS_INSTANCE.name, DbValue::text("/NODES/ALPHA"));
        values.insert(props::PROP_KEY.name, DbValue::text("site"));
        values.insert(props::PROP_VALUE.name, DbValue::text(value));
        values
    }

    fn prop_key() -> RowValues {
        let mut key = prop_row("");
        key.remove(props::PROP_VALUE.name);
        key
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(&drbd_vlm_dfns::TABLE);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS LAYER_DRBD_VOLUME_DEFINITIONS"));
        assert!(sql.contains("VLM_MINOR_NR BIGINT,"));
        assert!(sql.contains("RESOURCE_NAME TEXT NOT NULL"));
        assert!(sql.contains("PRIMARY KEY (RESOURCE_NAME, RESOURCE_NAME_SUFFIX, SNAPSHOT_NAME, VLM_NR)"));
    }

    #[tokio::test]
    async fn test_upsert_update_delete() {
        let engine = SqlEngine::open_in_memory().unwrap();
        engine
            .commit(&[WriteOp::Upsert {
                table: &props::TABLE,
                values: prop_row("east"),
            }])
            .await
            .unwrap();

        engine
            .commit(&[WriteOp::Update {
                table: &props::TABLE,
                key: prop_key(),
                column: props::PROP_VALUE,
                value: DbValue::text("west"),
            }])
            .await
            .unwrap();

        let rows = engine.load_all(&props::TABLE).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_string(&props::PROP_VALUE).unwrap(), "west");

        engine
            .commit(&[WriteOp::Delete {
                table: &props::TABLE,
                key: prop_key(),
            }])
            .await
            .unwrap();
        assert!(engine.load_all(&props::TABLE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_is_atomic() {
        let engine = SqlEngine::open_in_memory().unwrap();
        let mut missing = prop_key();
        missing.insert(props::PROP_KEY.name, DbValue::text("absent"));

        let result = engine
            .commit(&[
                WriteOp::Upsert {
                    table: &props::TABLE,
                    values: prop_row("east"),
                },
                WriteOp::Update {
                    table: &props::TABLE,
                    key: missing,
                    column: props::PROP_VALUE,
                    value: DbValue::text("x"),
                },
            ])
            .await;

        assert_matches!(result, Err(Error::NotFound { .. }));
        assert!(engine.load_all(&props::TABLE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.db");

        {
            let engine = SqlEngine::open(&path).unwrap();
            engine
                .commit(&[WriteOp::Upsert {
                    table: &props::TABLE,
                    values: prop_row("east"),
                }])
                .await
                .unwrap();
        }

        let engine = SqlEngine::open(&path).unwrap();
        let rows = engine.load_all(&props::TABLE).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}

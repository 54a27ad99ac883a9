//! Backend Engine Adapters
//!
//! One contract, three structurally different stores:
//! - `sql`: relational tables (SQLite)
//! - `etcd`: `prefix/TABLE/primaryKey/COLUMN` string keys
//! - `k8s`: one declarative record per logical row
//!
//! Writes are never applied one by one. A transaction buffers [`WriteOp`]s
//! and hands the whole batch to [`DbEngine::commit`], which applies it
//! atomically or not at all.

pub mod etcd;
pub mod k8s;
pub mod sql;

pub use etcd::{EtcdKvStore, KvEngine, KvOp, KvStore, MemoryKvStore};
pub use k8s::{CrdEngine, CrdOp, CrdStore, DbRecord, DbRecordSpec, KubeCrdStore, MemoryCrdStore};
pub use sql::SqlEngine;

use crate::db::raw::RawRow;
use crate::db::table::{Column, Table};
use crate::db::value::{DbValue, RowValues};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

// =============================================================================
// Write Operations
// =============================================================================

/// One buffered write of the ambient transaction
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a full row
    Upsert {
        table: &'static Table,
        values: RowValues,
    },
    /// Update a single column of an existing row
    Update {
        table: &'static Table,
        key: RowValues,
        column: Column,
        value: DbValue,
    },
    /// Delete a row
    Delete {
        table: &'static Table,
        key: RowValues,
    },
}

impl WriteOp {
    pub fn table(&self) -> &'static Table {
        match self {
            WriteOp::Upsert { table, .. } | WriteOp::Update { table, .. } | WriteOp::Delete { table, .. } => {
                table
            }
        }
    }

    /// Primary key values of the affected row
    pub fn key(&self) -> RowValues {
        match self {
            WriteOp::Upsert { table, values } => table
                .primary_key()
                .filter_map(|c| values.get(c.name).map(|v| (c.name, v.clone())))
                .collect(),
            WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => key.clone(),
        }
    }
}

// =============================================================================
// DbEngine Trait
// =============================================================================

/// Contract implemented once per backend
#[async_trait]
pub trait DbEngine: Send + Sync {
    /// Engine name for logs and errors
    fn name(&self) -> &'static str;

    /// Read every row of a table
    async fn load_all(&self, table: &'static Table) -> Result<Vec<RawRow>>;

    /// Apply a batch of writes atomically
    async fn commit(&self, ops: &[WriteOp]) -> Result<()>;
}

/// Shared engine handle
pub type SharedEngine = Arc<dyn DbEngine>;

// =============================================================================
// Configuration & Factory
// =============================================================================

/// Backend selection, made once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum EngineConfig {
    /// SQLite database file, in-memory when no path is given
    Sql {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// etcd cluster
    Etcd {
        endpoints: Vec<String>,
        #[serde(default = "default_kv_prefix")]
        prefix: String,
    },
    /// Kubernetes custom resources
    K8sCrd,
    /// In-process key-value store
    MemoryKv {
        #[serde(default = "default_kv_prefix")]
        prefix: String,
    },
    /// In-process custom resource store
    MemoryCrd,
}

fn default_kv_prefix() -> String {
    etcd::DEFAULT_PREFIX.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Sql { path: None }
    }
}

/// Factory for backend engines
pub struct EngineFactory;

impl EngineFactory {
    /// Open the configured engine
    pub async fn create(config: &EngineConfig) -> Result<SharedEngine> {
        let engine: SharedEngine = match config {
            EngineConfig::Sql { path: Some(path) } => Arc::new(SqlEngine::open(path)?),
            EngineConfig::Sql { path: None } => Arc::new(SqlEngine::open_in_memory()?),
            EngineConfig::Etcd { endpoints, prefix } => {
                let store = EtcdKvStore::connect(endpoints).await?;
                Arc::new(KvEngine::new(Arc::new(store), prefix))
            }
            EngineConfig::K8sCrd => {
                let store = KubeCrdStore::try_default().await?;
                Arc::new(CrdEngine::new(Arc::new(store)))
            }
            EngineConfig::MemoryKv { prefix } => {
                Arc::new(KvEngine::new(Arc::new(MemoryKvStore::new()), prefix))
            }
            EngineConfig::MemoryCrd => Arc::new(CrdEngine::new(Arc::new(MemoryCrdStore::new()))),
        };
        info!("Opened {} database engine", engine.name());
        Ok(engine)
    }
}

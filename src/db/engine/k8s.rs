//! Declarative-Resource Engine
//!
//! One cluster-scoped `DbRecord` custom resource per logical row. The record
//! name is derived from the table and the primary key; updates replace the
//! record wholesale. The API server has no multi-object transactions, so a
//! commit captures the pre-image of every touched record and restores them
//! if a later write of the same commit fails.

use crate::db::engine::{DbEngine, WriteOp};
use crate::db::raw::RawRow;
use crate::db::table::Table;
use crate::db::value::{key_string, DbValue, RowValues};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Label carrying the table name of a record
pub const TABLE_LABEL: &str = "db.storage.billyronks.io/table";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "storage-controller-db";

// =============================================================================
// DbRecord CRD
// =============================================================================

/// One row of one table
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "db.storage.billyronks.io",
    version = "v1",
    kind = "DbRecord",
    plural = "dbrecords",
    shortname = "dbr",
    printcolumn = r#"{"name": "Table", "type": "string", "jsonPath": ".spec.table"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct DbRecordSpec {
    /// Table name
    pub table: String,

    /// Column name -> value, one entry per registered column
    #[serde(default)]
    pub columns: BTreeMap<String, serde_json::Value>,
}

/// Record name of a row: `<table>-<sha256(pk)[..32]>`
pub fn record_name(table: &Table, key: &RowValues) -> String {
    let digest = Sha256::digest(key_string(table, key).as_bytes());
    let hash = hex::encode(digest);
    format!(
        "{}-{}",
        table.name.to_ascii_lowercase().replace('_', "-"),
        &hash[..32]
    )
}

// =============================================================================
// CrdStore Trait
// =============================================================================

/// One record operation
#[derive(Debug, Clone, PartialEq)]
pub enum CrdOp {
    Replace { name: String, spec: DbRecordSpec },
    Delete { name: String },
}

impl CrdOp {
    pub fn name(&self) -> &str {
        match self {
            CrdOp::Replace { name, .. } | CrdOp::Delete { name } => name,
        }
    }
}

/// Record store surface used by the engine
#[async_trait]
pub trait CrdStore: Send + Sync {
    /// Every record of a table
    async fn list(&self, table: &str) -> Result<Vec<DbRecordSpec>>;

    async fn get(&self, name: &str) -> Result<Option<DbRecordSpec>>;

    /// Create or replace; deleting an absent record succeeds
    async fn apply(&self, op: CrdOp) -> Result<()>;
}

/// In-process record store
#[derive(Debug, Default)]
pub struct MemoryCrdStore {
    records: DashMap<String, DbRecordSpec>,
}

impl MemoryCrdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CrdStore for MemoryCrdStore {
    async fn list(&self, table: &str) -> Result<Vec<DbRecordSpec>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.value().table == table)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn get(&self, name: &str) -> Result<Option<DbRecordSpec>> {
        Ok(self.records.get(name).map(|r| r.value().clone()))
    }

    async fn apply(&self, op: CrdOp) -> Result<()> {
        match op {
            CrdOp::Replace { name, spec } => {
                self.records.insert(name, spec);
            }
            CrdOp::Delete { name } => {
                self.records.remove(&name);
            }
        }
        Ok(())
    }
}

/// Kubernetes API server store
pub struct KubeCrdStore {
    api: Api<DbRecord>,
}

impl KubeCrdStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    /// Use the in-cluster or kubeconfig client
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }
}

#[async_trait]
impl CrdStore for KubeCrdStore {
    async fn list(&self, table: &str) -> Result<Vec<DbRecordSpec>> {
        let params = ListParams::default().labels(&format!("{}={}", TABLE_LABEL, table));
        let list = self.api.list(&params).await?;
        Ok(list.items.into_iter().map(|r| r.spec).collect())
    }

    async fn get(&self, name: &str) -> Result<Option<DbRecordSpec>> {
        Ok(self.api.get_opt(name).await?.map(|r| r.spec))
    }

    async fn apply(&self, op: CrdOp) -> Result<()> {
        match op {
            CrdOp::Replace { name, spec } => {
                let mut labels = BTreeMap::new();
                labels.insert(TABLE_LABEL.to_string(), spec.table.clone());
                let mut record = DbRecord::new(&name, spec);
                record.metadata.labels = Some(labels);
                let params = PatchParams::apply(FIELD_MANAGER).force();
                self.api.patch(&name, &params, &Patch::Apply(&record)).await?;
            }
            CrdOp::Delete { name } => match self.api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Declarative-resource engine over any [`CrdStore`]
pub struct CrdEngine {
    store: Arc<dyn CrdStore>,
}

impl CrdEngine {
    pub fn new(store: Arc<dyn CrdStore>) -> Self {
        Self { store }
    }

    fn spec_of(table: &Table, values: &RowValues) -> DbRecordSpec {
        DbRecordSpec {
            table: table.name.to_string(),
            columns: table
                .columns
                .iter()
                .map(|c| {
                    let value = values.get(c.name).unwrap_or(&DbValue::Null);
                    (c.name.to_string(), value.to_json())
                })
                .collect(),
        }
    }

    async fn current(
        &self,
        staged: &BTreeMap<String, Option<DbRecordSpec>>,
        name: &str,
    ) -> Result<Option<DbRecordSpec>> {
        match staged.get(name) {
            Some(spec) => Ok(spec.clone()),
            None => self.store.get(name).await,
        }
    }

    async fn restore(&self, pre_images: Vec<(String, Option<DbRecordSpec>)>) {
        for (name, spec) in pre_images {
            let op = match spec {
                Some(spec) => CrdOp::Replace {
                    name: name.clone(),
                    spec,
                },
                None => CrdOp::Delete { name: name.clone() },
            };
            if let Err(e) = self.store.apply(op).await {
                error!("Failed to restore record {} after aborted commit: {}", name, e);
            }
        }
    }
}

#[async_trait]
impl DbEngine for CrdEngine {
    fn name(&self) -> &'static str {
        "k8s-crd"
    }

    async fn load_all(&self, table: &'static Table) -> Result<Vec<RawRow>> {
        let mut rows = Vec::new();
        for spec in self.store.list(table.name).await? {
            let mut values = BTreeMap::new();
            for (name, json) in &spec.columns {
                let Some(column) = table.column(name) else {
                    warn!("Ignoring unknown column {} of a {} record", name, table);
                    continue;
                };
                let value = DbValue::from_json(json).ok_or_else(|| Error::Parse {
                    table: table.name,
                    column: column.name,
                    value: json.to_string(),
                    reason: "unsupported JSON value".to_string(),
                })?;
                values.insert(column.name.to_string(), value);
            }
            rows.push(RawRow::new(table, values));
        }
        Ok(rows)
    }

    async fn commit(&self, ops: &[WriteOp]) -> Result<()> {
        let mut staged: BTreeMap<String, Option<DbRecordSpec>> = BTreeMap::new();
        for op in ops {
            let table = op.table();
            let name = record_name(table, &op.key());
            let next = match op {
                WriteOp::Upsert { values, .. } => Some(Self::spec_of(table, values)),
                WriteOp::Update { column, value, .. } => {
                    let mut spec = self.current(&staged, &name).await?.ok_or_else(|| Error::NotFound {
                        kind: "row",
                        name: format!("{}[{}]", table.name, key_string(table, &op.key())),
                    })?;
                    spec.columns.insert(column.name.to_string(), value.to_json());
                    Some(spec)
                }
                WriteOp::Delete { .. } => None,
            };
            staged.insert(name, next);
        }

        let mut applied = Vec::with_capacity(staged.len());
        for (name, next) in staged {
            let pre_image = self.store.get(&name).await?;
            let op = match next {
                Some(spec) => CrdOp::Replace {
                    name: name.clone(),
                    spec,
                },
                None => CrdOp::Delete { name: name.clone() },
            };
            if let Err(e) = self.store.apply(op).await {
                warn!("Record write {} failed, restoring {} records", name, applied.len());
                self.restore(applied).await;
                return Err(e);
            }
            applied.push((name, pre_image));
        }
        debug!("Committed {} record writes", applied.len());
        Ok(())
    }
}

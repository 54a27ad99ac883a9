//! Key-Value Engine
//!
//! Each column of a row is one key:
//!
//! ```text
//! <prefix><TABLE>/<pk1:pk2:...>/<COLUMN>  ->  value
//! ```
//!
//! A logical row is the set of keys sharing `<TABLE>/<pk>/`. NULL is stored
//! as the `:null` marker. Deletes enumerate every column key of the row; a
//! ranged prefix delete would collide with a put of the same row in one etcd
//! transaction ("duplicate key given in txn request"). Writes of one commit
//! are staged per key, so the last write to a key wins and every key appears
//! at most once in the transaction.

use crate::db::engine::{DbEngine, WriteOp};
use crate::db::raw::RawRow;
use crate::db::table::Table;
use crate::db::value::{key_string, DbValue, RowValues};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use etcd_client::{Client, GetOptions, Txn, TxnOp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default key prefix
pub const DEFAULT_PREFIX: &str = "/STORAGE/";

// =============================================================================
// KvStore Trait
// =============================================================================

/// One key operation of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put { key: String, value: String },
    Delete { key: String },
}

impl KvOp {
    pub fn key(&self) -> &str {
        match self {
            KvOp::Put { key, .. } | KvOp::Delete { key } => key,
        }
    }
}

/// Minimal key-value store surface used by the engine
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Every key/value pair under a prefix, read at one revision
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Apply all operations atomically
    async fn txn(&self, ops: Vec<KvOp>) -> Result<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-process store with etcd transaction semantics
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn txn(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut seen = HashSet::with_capacity(ops.len());
        if let Some(dup) = ops.iter().find(|op| !seen.insert(op.key())) {
            return Err(Error::Backend {
                engine: "memory-kv",
                operation: "txn",
                reason: format!("duplicate key given in txn request: {}", dup.key()),
            });
        }

        let mut data = self.data.write();
        for op in ops {
            match op {
                KvOp::Put { key, value } => {
                    data.insert(key, value);
                }
                KvOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// etcd Store
// =============================================================================

/// etcd cluster store
pub struct EtcdKvStore {
    client: Client,
}

impl EtcdKvStore {
    /// Connect, retrying with exponential backoff for up to 30 seconds
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        info!("Connecting to etcd cluster: {:?}", endpoints);
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let client = backoff::future::retry(policy, || async move {
            Client::connect(endpoints, None).await.map_err(|e| {
                warn!("etcd connection attempt failed: {}", e);
                backoff::Error::transient(e)
            })
        })
        .await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KvStore for EtcdKvStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        resp.kvs()
            .iter()
            .map(|kv| Ok((kv.key_str()?.to_string(), kv.value_str()?.to_string())))
            .collect()
    }

    async fn txn(&self, ops: Vec<KvOp>) -> Result<()> {
        let ops: Vec<TxnOp> = ops
            .into_iter()
            .map(|op| match op {
                KvOp::Put { key, value } => TxnOp::put(key, value, None),
                KvOp::Delete { key } => TxnOp::delete(key, None),
            })
            .collect();
        let mut client = self.client.clone();
        let resp = client.txn(Txn::new().and_then(ops)).await?;
        if !resp.succeeded() {
            return Err(Error::Backend {
                engine: "etcd",
                operation: "txn",
                reason: "transaction was not applied".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Key-value engine over any [`KvStore`]
pub struct KvEngine {
    store: Arc<dyn KvStore>,
    prefix: String,
}

impl KvEngine {
    pub fn new(store: Arc<dyn KvStore>, prefix: &str) -> Self {
        let prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };
        Self { store, prefix }
    }

    fn table_prefix(&self, table: &Table) -> String {
        format!("{}{}/", self.prefix, table.name)
    }

    fn row_prefix(&self, table: &Table, key: &RowValues) -> String {
        format!("{}{}/", self.table_prefix(table), key_string(table, key))
    }

    /// Whether the row under `row` exists once the writes staged so far
    /// are applied
    async fn row_exists(
        &self,
        table: &Table,
        row: &str,
        staged: &BTreeMap<String, Option<String>>,
    ) -> Result<bool> {
        for column in table.columns {
            if let Some(value) = staged.get(&format!("{}{}", row, column.name)) {
                return Ok(value.is_some());
            }
        }
        // Keys with slashes share prefixes, so only direct column keys count
        Ok(self
            .store
            .get_prefix(row)
            .await?
            .iter()
            .any(|(key, _)| key.strip_prefix(row).is_some_and(|column| !column.contains('/'))))
    }

    /// Stage the key writes of one operation; later writes to the same key
    /// replace earlier ones. An update of a missing row fails.
    async fn stage(&self, op: &WriteOp, staged: &mut BTreeMap<String, Option<String>>) -> Result<()> {
        let table = op.table();
        let key = op.key();
        let row = self.row_prefix(table, &key);
        match op {
            WriteOp::Upsert { values, .. } => {
                for column in table.columns {
                    let value = values.get(column.name).unwrap_or(&DbValue::Null);
                    staged.insert(format!("{}{}", row, column.name), Some(value.to_kv_string()));
                }
            }
            WriteOp::Update { column, value, .. } => {
                if !self.row_exists(table, &row, staged).await? {
                    return Err(Error::NotFound {
                        kind: "row",
                        name: format!("{}[{}]", table.name, key_string(table, &key)),
                    });
                }
                staged.insert(format!("{}{}", row, column.name), Some(value.to_kv_string()));
            }
            WriteOp::Delete { .. } => {
                for column in table.columns {
                    staged.insert(format!("{}{}", row, column.name), None);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DbEngine for KvEngine {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn load_all(&self, table: &'static Table) -> Result<Vec<RawRow>> {
        let table_prefix = self.table_prefix(table);
        let mut rows: BTreeMap<String, BTreeMap<String, DbValue>> = BTreeMap::new();

        for (key, value) in self.store.get_prefix(&table_prefix).await? {
            let Some((pk, column)) = key
                .strip_prefix(&table_prefix)
                .and_then(|rest| rest.rsplit_once('/'))
            else {
                warn!("Ignoring malformed key {}", key);
                continue;
            };
            if table.column(column).is_none() {
                warn!("Ignoring unknown column key {}", key);
                continue;
            }
            rows.entry(pk.to_string())
                .or_default()
                .insert(column.to_string(), DbValue::from_kv_string(&value));
        }

        Ok(rows
            .into_values()
            .map(|values| RawRow::new(table, values))
            .collect())
    }

    async fn commit(&self, ops: &[WriteOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut staged = BTreeMap::new();
        for op in ops {
            self.stage(op, &mut staged).await?;
        }
        let kv_ops: Vec<KvOp> = staged
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => KvOp::Put { key, value },
                None => KvOp::Delete { key },
            })
            .collect();
        debug!("Committing {} key operations for {} writes", kv_ops.len(), ops.len());
        self.store.txn(kv_ops).await
    }
}

//! Controller State
//!
//! The explicit application state of one controller process: the selected
//! backend engine, the column registries, the object cache and the access
//! policy. Every mutating operation follows the same shape:
//!
//! ```text
//!   begin() ──► access check ──► validate ──► mutate cache + buffer WriteOps
//!                                                        │
//!                      rollback ◄── engine failure ── commit()
//! ```
//!
//! Operations are grouped by the objects they touch:
//! - `nodes`: nodes, storage pools, properties
//! - `resources`: resource and volume definitions, resources
//! - `layers`: layer tree assembly and teardown
//! - `snapshots`: snapshot definitions and snapshots

mod layers;
mod nodes;
mod resources;
mod snapshots;

pub use resources::{DEFAULT_RSC_GROUP, STOR_POOL_PROP};

use crate::cache::{GraphSnapshot, ObjectCache};
use crate::db::drivers::{AclEntry, DbDrivers};
use crate::db::engine::{EngineConfig, EngineFactory, SharedEngine};
use crate::db::loader::DatabaseLoader;
use crate::domain::layers::TransportType;
use crate::domain::security::{
    AccessContext, AccessPolicy, AccessType, DefaultAccessPolicy, ObjectProtection, NODES_MAP_PATH,
    RSC_DFN_MAP_PATH, STOR_POOL_MAP_PATH,
};
use crate::error::{Error, Result};
use crate::metrics::DbMetrics;
use crate::numberpool::NumberPoolsConfig;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::info;

// =============================================================================
// Configuration
// =============================================================================

/// Defaults for new DRBD resource definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DrbdDefaults {
    pub peer_slots: u16,
    pub al_stripes: u32,
    pub al_stripe_size_kib: u64,
    pub transport: TransportType,
}

impl Default for DrbdDefaults {
    fn default() -> Self {
        Self {
            peer_slots: 7,
            al_stripes: 1,
            al_stripe_size_kib: 32,
            transport: TransportType::Ip,
        }
    }
}

/// Configuration of one controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    pub database: EngineConfig,
    pub pools: NumberPoolsConfig,
    pub drbd: DrbdDefaults,
}

impl ControllerConfig {
    /// Load the configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.pools.validate()?;
        if self.drbd.peer_slots == 0 {
            return Err(Error::Configuration("DRBD peer slots must be at least 1".to_string()));
        }
        if let EngineConfig::Etcd { endpoints, .. } = &self.database {
            if endpoints.is_empty() {
                return Err(Error::Configuration("etcd engine needs at least one endpoint".to_string()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Application state of one controller process
pub struct Controller {
    config: ControllerConfig,
    engine: SharedEngine,
    drivers: DbDrivers,
    cache: Arc<RwLock<ObjectCache>>,
    policy: Arc<dyn AccessPolicy>,
    metrics: DbMetrics,
}

impl Controller {
    /// Open the configured engine and run the full load pass
    pub async fn open(config: ControllerConfig, metrics: DbMetrics) -> Result<Self> {
        config.validate()?;
        let engine = EngineFactory::create(&config.database).await?;
        Self::with_engine(config, engine, metrics).await
    }

    /// Run the full load pass over an already opened engine
    pub async fn with_engine(config: ControllerConfig, engine: SharedEngine, metrics: DbMetrics) -> Result<Self> {
        let drivers = DbDrivers::new()?;
        let cache = DatabaseLoader::new(engine.clone(), config.pools, metrics.clone())
            .load()
            .await?;

        let controller = Self {
            config,
            engine,
            drivers,
            cache: Arc::new(RwLock::new(cache)),
            policy: Arc::new(DefaultAccessPolicy),
            metrics,
        };
        controller.ensure_containers().await?;
        Ok(controller)
    }

    /// Replace the access policy
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Rebuild the object graph from the backend. The current graph stays in
    /// place if the load pass fails.
    pub async fn reload(&self) -> Result<()> {
        let mut cache = self.cache.write().await;
        let fresh = DatabaseLoader::new(self.engine.clone(), self.config.pools, self.metrics.clone())
            .load()
            .await?;
        *cache = fresh;
        Ok(())
    }

    /// Start the ambient transaction; waits for the previous writer
    pub async fn begin(&self) -> Transaction {
        let guard = self.cache.clone().write_owned().await;
        Transaction::new(guard, self.engine.clone(), self.metrics.clone())
    }

    /// Shared read access to the committed object graph
    pub async fn read(&self) -> RwLockReadGuard<'_, ObjectCache> {
        self.cache.read().await
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.cache.read().await.snapshot()
    }

    // =========================================================================
    // Shared Helpers
    // =========================================================================

    /// Container protections grant every actor the right to create entities
    async fn ensure_containers(&self) -> Result<()> {
        let mut tx = self.begin().await;
        for path in [NODES_MAP_PATH, RSC_DFN_MAP_PATH, STOR_POOL_MAP_PATH] {
            if tx.cache().protections.contains_key(&path.to_string()) {
                continue;
            }
            info!("Creating container protection {}", path);
            self.insert_protection(&mut tx, ObjectProtection::container(path));
        }
        tx.commit().await
    }

    fn require_access(
        &self,
        tx: &Transaction,
        ctx: &AccessContext,
        path: &str,
        required: AccessType,
    ) -> Result<()> {
        let protection = tx.cache().require_protection(path)?;
        self.policy.require_access(ctx, protection, required)
    }

    fn insert_protection(&self, tx: &mut Transaction, protection: ObjectProtection) {
        tx.push(self.drivers.protections.upsert(&protection));
        for entry in AclEntry::of(&protection) {
            tx.push(self.drivers.acl.upsert(&entry));
        }
        tx.cache_mut()
            .protections
            .insert(protection.object_path.clone(), protection);
    }

    fn remove_protection(&self, tx: &mut Transaction, path: &str) {
        if let Some(protection) = tx.cache_mut().protections.remove(&path.to_string()) {
            for entry in AclEntry::of(&protection) {
                tx.push(self.drivers.acl.delete(&entry));
            }
            tx.push(self.drivers.protections.delete(&protection));
        }
    }
}

/// Creation time truncated to what the backends persist
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::engine::SqlEngine;

    pub async fn controller() -> Controller {
        Controller::with_engine(
            ControllerConfig::default(),
            Arc::new(SqlEngine::open_in_memory().unwrap()),
            DbMetrics::unregistered().unwrap(),
        )
        .await
        .unwrap()
    }

    pub fn admin() -> AccessContext {
        AccessContext::new("admin", "ADMIN")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_config_yaml() {
        let yaml = r#"
database:
  engine: memory_kv
  prefix: /TEST/
pools:
  minor: { min: 2000, max: 2999 }
drbd:
  peerSlots: 3
"#;
        let config: ControllerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database, EngineConfig::MemoryKv { prefix: "/TEST/".into() });
        assert_eq!(config.pools.minor.min, 2000);
        assert_eq!(config.pools.tcp_port, NumberPoolsConfig::default().tcp_port);
        assert_eq!(config.drbd.peer_slots, 3);
        assert_eq!(config.drbd.al_stripes, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.yaml");
        std::fs::write(&path, "database:\n  engine: etcd\n  endpoints: []\n").unwrap();
        assert!(matches!(
            ControllerConfig::from_yaml_file(&path),
            Err(Error::Configuration(_))
        ));

        std::fs::write(&path, "database:\n  engine: sql\n").unwrap();
        assert_eq!(ControllerConfig::from_yaml_file(&path).unwrap(), ControllerConfig::default());
        assert!(ControllerConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }

    #[tokio::test]
    async fn test_containers_created_once() {
        let controller = controller().await;
        let cache = controller.read().await;
        for path in [NODES_MAP_PATH, RSC_DFN_MAP_PATH, STOR_POOL_MAP_PATH] {
            let protection = cache.require_protection(path).unwrap();
            assert_eq!(protection.granted("ANYONE"), Some(AccessType::Change));
        }
        drop(cache);

        controller.reload().await.unwrap();
        assert_eq!(controller.snapshot().await.protections.len(), 3);
    }

    #[test]
    fn test_now_millis_truncated() {
        assert_eq!(now_millis().timestamp_subsec_nanos() % 1_000_000, 0);
    }
}

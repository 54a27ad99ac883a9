//! Nodes, storage pools and properties

use super::{Controller, STOR_POOL_PROP};
use crate::db::drivers::props::{node_instance, stor_pool_instance};
use crate::db::drivers::Prop;
use crate::db::table;
use crate::db::value::DbValue;
use crate::domain::names::{NodeName, ResourceName, StorPoolName, VolumeNumber};
use crate::domain::objects::{
    DeviceProviderKind, Node, NodeFlags, NodeType, ResourceKey, RscDfnKey, StorPool, StorPoolKey, VlmDfnKey,
};
use crate::domain::security::{AccessContext, AccessType, ObjectProtection, NODES_MAP_PATH, STOR_POOL_MAP_PATH};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use tracing::debug;
use uuid::Uuid;

impl Controller {
    // =========================================================================
    // Nodes
    // =========================================================================

    pub async fn create_node(&self, ctx: &AccessContext, name: &str, node_type: NodeType) -> Result<Node> {
        let name = NodeName::new(name)?;
        let mut tx = self.begin().await;
        self.require_access(&tx, ctx, NODES_MAP_PATH, AccessType::Change)?;

        if tx.cache().nodes.contains_key(&name) {
            return Err(Error::AlreadyExists {
                kind: "node",
                name: name.to_string(),
            });
        }

        let node = Node {
            uuid: Uuid::new_v4(),
            name: name.clone(),
            node_type,
            flags: NodeFlags::empty(),
        };
        self.insert_protection(&mut tx, ObjectProtection::new(ObjectProtection::node_path(name.key()), ctx));
        tx.push(self.drivers.nodes.upsert(&node));
        tx.cache_mut().nodes.insert(name, node.clone());
        tx.commit().await?;

        debug!("Created node {}", node.name);
        Ok(node)
    }

    /// Delete a node together with its storage pools. Refused while
    /// resources or snapshots are placed on it.
    pub async fn delete_node(&self, ctx: &AccessContext, name: &str) -> Result<()> {
        let name = NodeName::new(name)?;
        let mut tx = self.begin().await;
        let node = tx.cache().require_node(&name)?.clone();
        self.require_access(&tx, ctx, &ObjectProtection::node_path(name.key()), AccessType::Control)?;

        let deployed = tx.cache().resources_on(&name).len();
        if deployed > 0 {
            return Err(Error::StillInUse {
                kind: "node",
                name: name.to_string(),
                reason: format!("{} resources or snapshots are placed on it", deployed),
            });
        }

        let pools: Vec<StorPoolKey> = tx
            .cache()
            .stor_pools
            .keys()
            .filter(|key| key.node == name)
            .cloned()
            .collect();
        for pool in pools {
            self.remove_stor_pool(&mut tx, &pool)?;
        }

        self.remove_props(&mut tx, &node_instance(&name));
        self.remove_protection(&mut tx, &ObjectProtection::node_path(name.key()));
        tx.push(self.drivers.nodes.delete(&node));
        tx.cache_mut().nodes.remove(&name);
        tx.commit().await?;

        debug!("Deleted node {}", name);
        Ok(())
    }

    pub async fn set_node_flags(&self, ctx: &AccessContext, name: &str, flags: NodeFlags) -> Result<()> {
        let name = NodeName::new(name)?;
        let mut tx = self.begin().await;
        tx.cache().require_node(&name)?;
        self.require_access(&tx, ctx, &ObjectProtection::node_path(name.key()), AccessType::Change)?;

        let driver = self.drivers.nodes.column_driver(&table::nodes::NODE_FLAGS)?;
        let op = match tx.cache_mut().nodes.get_mut(&name) {
            Some(node) => driver.update(node, DbValue::Int(flags.bits() as i64))?,
            None => return Err(Error::Internal(format!("node {} vanished", name))),
        };
        tx.push(op);
        tx.commit().await
    }

    // =========================================================================
    // Storage Pools
    // =========================================================================

    pub async fn create_stor_pool(
        &self,
        ctx: &AccessContext,
        node: &str,
        pool: &str,
        provider: DeviceProviderKind,
    ) -> Result<StorPool> {
        let node = NodeName::new(node)?;
        let pool = StorPoolName::new(pool)?;
        let mut tx = self.begin().await;
        self.require_access(&tx, ctx, STOR_POOL_MAP_PATH, AccessType::Change)?;
        let node = tx.cache().require_node(&node)?.name.clone();

        let key = StorPoolKey::new(node.clone(), pool.clone());
        if tx.cache().stor_pools.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "storage pool",
                name: key.to_string(),
            });
        }

        let stor_pool = StorPool {
            uuid: Uuid::new_v4(),
            free_space_mgr: format!("{}:{}", node.display(), pool.display()),
            node,
            name: pool,
            provider,
        };
        tx.push(self.drivers.stor_pools.upsert(&stor_pool));
        tx.cache_mut().stor_pools.insert(key, stor_pool.clone());
        tx.commit().await?;

        debug!("Created storage pool {} ({})", stor_pool.key(), stor_pool.provider);
        Ok(stor_pool)
    }

    /// Refused while any layer volume references the pool
    pub async fn delete_stor_pool(&self, ctx: &AccessContext, node: &str, pool: &str) -> Result<()> {
        let key = StorPoolKey::new(NodeName::new(node)?, StorPoolName::new(pool)?);
        let mut tx = self.begin().await;
        self.require_access(&tx, ctx, STOR_POOL_MAP_PATH, AccessType::Change)?;
        self.remove_stor_pool(&mut tx, &key)?;
        tx.commit().await?;

        debug!("Deleted storage pool {}", key);
        Ok(())
    }

    fn remove_stor_pool(&self, tx: &mut Transaction, key: &StorPoolKey) -> Result<()> {
        let pool = tx.cache().require_stor_pool(key)?.clone();
        let users = tx.cache().pool_users(key);
        if !users.is_empty() {
            return Err(Error::StillInUse {
                kind: "storage pool",
                name: key.to_string(),
                reason: format!("{} layer volumes reference it", users.len()),
            });
        }

        self.remove_props(tx, &stor_pool_instance(&key.node, &key.pool));
        tx.push(self.drivers.stor_pools.delete(&pool));
        tx.cache_mut().stor_pools.remove(key);
        Ok(())
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Insert or overwrite one property. The instance must name an existing
    /// object; access is checked against the protection of its owner.
    pub async fn set_prop(&self, ctx: &AccessContext, instance: &str, key: &str, value: &str) -> Result<()> {
        let mut tx = self.begin().await;
        let owner = prop_owner(&tx, instance)?;
        self.require_access(&tx, ctx, &owner, AccessType::Change)?;
        self.put_prop(&mut tx, instance, key, value)?;
        tx.commit().await
    }

    /// Returns whether the property existed
    pub async fn remove_prop(&self, ctx: &AccessContext, instance: &str, key: &str) -> Result<bool> {
        let mut tx = self.begin().await;
        let owner = prop_owner(&tx, instance)?;
        self.require_access(&tx, ctx, &owner, AccessType::Change)?;
        if key == STOR_POOL_PROP && instance.starts_with("/RESOURCES/") {
            return Err(Error::StillInUse {
                kind: "property",
                name: format!("{}:{}", instance, key),
                reason: "it names the storage pool of the resource's volumes".to_string(),
            });
        }

        let prop_key = (instance.to_string(), key.to_string());
        let removed = match tx.cache_mut().props.remove(&prop_key) {
            Some(value) => {
                tx.push(self.drivers.props.delete(&Prop::new(instance, key, value)));
                true
            }
            None => false,
        };
        tx.commit().await?;
        Ok(removed)
    }

    pub(super) fn put_prop(&self, tx: &mut Transaction, instance: &str, key: &str, value: &str) -> Result<()> {
        let prop_key = (instance.to_string(), key.to_string());
        let op = match tx.cache().props.get(&prop_key) {
            Some(old) => {
                let mut prop = Prop::new(instance, key, old.as_str());
                self.drivers
                    .props
                    .column_driver(&table::props::PROP_VALUE)?
                    .update(&mut prop, DbValue::text(value))?
            }
            None => self.drivers.props.upsert(&Prop::new(instance, key, value)),
        };
        tx.push(op);
        tx.cache_mut().props.insert(prop_key, value.to_string());
        Ok(())
    }

    /// Drop every property of one instance
    pub(super) fn remove_props(&self, tx: &mut Transaction, instance: &str) {
        let keys: Vec<String> = tx
            .cache()
            .props_of(instance)
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect();
        for key in keys {
            if let Some(value) = tx.cache_mut().props.remove(&(instance.to_string(), key.clone())) {
                tx.push(self.drivers.props.delete(&Prop::new(instance, key, value)));
            }
        }
    }
}

/// Protection path guarding the properties of one instance
fn prop_owner(tx: &Transaction, instance: &str) -> Result<String> {
    let cache = tx.cache();
    let parts: Vec<&str> = instance.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        ["NODES", node] => {
            let node = NodeName::new(node)?;
            cache.require_node(&node)?;
            Ok(ObjectProtection::node_path(node.key()))
        }
        ["STORPOOLCONF", node, pool] => {
            let key = StorPoolKey::new(NodeName::new(node)?, StorPoolName::new(pool)?);
            cache.require_stor_pool(&key)?;
            Ok(ObjectProtection::node_path(key.node.key()))
        }
        ["RESOURCEDEFINITIONS", rsc] => {
            let key = RscDfnKey::new(ResourceName::new(rsc)?, None);
            cache.require_rsc_dfn(&key)?;
            Ok(ObjectProtection::rsc_dfn_path(key.rsc.key()))
        }
        ["VOLUMEDEFINITIONS", rsc, vlm_nr] => {
            let vlm_nr = vlm_nr.parse::<i64>().map_err(|_| unknown_instance(instance))?;
            let key = VlmDfnKey {
                rsc: ResourceName::new(rsc)?,
                snap: None,
                vlm_nr: VolumeNumber::new(vlm_nr)?,
            };
            cache.require_vlm_dfn(&key)?;
            Ok(ObjectProtection::rsc_dfn_path(key.rsc.key()))
        }
        ["RESOURCES", node, rsc] => {
            let key = ResourceKey::new(NodeName::new(node)?, ResourceName::new(rsc)?, None);
            cache.require_resource(&key)?;
            Ok(ObjectProtection::rsc_dfn_path(key.rsc.key()))
        }
        _ => Err(unknown_instance(instance)),
    }
}

fn unknown_instance(instance: &str) -> Error {
    Error::NotFound {
        kind: "property instance",
        name: instance.to_string(),
    }
}

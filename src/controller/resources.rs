//! Resource definitions, volume definitions and resources

use super::{now_millis, Controller};
use crate::db::drivers::props::{resource_instance, rsc_dfn_instance, vlm_dfn_instance};
use crate::db::table;
use crate::db::value::DbValue;
use crate::domain::layers::{validate_layer_stack, DeviceLayerKind, DrbdRscDfnData, DrbdVlmDfnData};
use crate::domain::names::{MinorNumber, NodeName, ResourceName, StorPoolName, SuffixedResourceName, VolumeNumber};
use crate::domain::objects::{
    DeviceProviderKind, Resource, ResourceDefinition, ResourceKey, RscDfnFlags, RscDfnKey, RscFlags, StorPoolKey,
    VlmDfnFlags, VlmDfnKey, VlmFlags, Volume, VolumeDefinition,
};
use crate::domain::security::{AccessContext, AccessType, ObjectProtection, RSC_DFN_MAP_PATH};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use tracing::debug;
use uuid::Uuid;

/// Property on a resource naming the storage pool its volumes live in
pub const STOR_POOL_PROP: &str = "StorPoolName";

/// Resource group of definitions created without one
pub const DEFAULT_RSC_GROUP: &str = "DfltRscGrp";

fn live(rsc: &ResourceName) -> RscDfnKey {
    RscDfnKey::new(rsc.clone(), None)
}

impl Controller {
    // =========================================================================
    // Resource Definitions
    // =========================================================================

    pub async fn create_rsc_dfn(
        &self,
        ctx: &AccessContext,
        name: &str,
        layer_stack: &[DeviceLayerKind],
    ) -> Result<ResourceDefinition> {
        let name = ResourceName::new(name)?;
        validate_layer_stack(layer_stack)?;
        let mut tx = self.begin().await;
        self.require_access(&tx, ctx, RSC_DFN_MAP_PATH, AccessType::Change)?;

        let key = live(&name);
        if tx.cache().rsc_dfns.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "resource definition",
                name: name.to_string(),
            });
        }

        let dfn = ResourceDefinition {
            uuid: Uuid::new_v4(),
            name: name.clone(),
            snap: None,
            layer_stack: layer_stack.to_vec(),
            flags: RscDfnFlags::empty(),
            group: DEFAULT_RSC_GROUP.to_string(),
        };
        tx.push(self.drivers.rsc_dfns.upsert(&dfn));
        tx.cache_mut().rsc_dfns.insert(key, dfn.clone());

        if layer_stack.contains(&DeviceLayerKind::Drbd) {
            let defaults = &self.config.drbd;
            let data = DrbdRscDfnData {
                name: SuffixedResourceName::new(name.clone(), None, ""),
                peer_slots: defaults.peer_slots,
                al_stripes: defaults.al_stripes,
                al_stripe_size_kib: defaults.al_stripe_size_kib,
                tcp_port: Some(tx.allocate_tcp_port()?),
                transport: defaults.transport,
                secret: Some(Uuid::new_v4().simple().to_string()),
            };
            tx.push(self.drivers.drbd_rsc_dfns.upsert(&data));
            tx.cache_mut().drbd_rsc_dfns.insert(data.name.clone(), data);
        }

        self.insert_protection(&mut tx, ObjectProtection::new(ObjectProtection::rsc_dfn_path(name.key()), ctx));
        tx.commit().await?;

        debug!("Created resource definition {} with layer stack {:?}", dfn.name, dfn.layer_stack);
        Ok(dfn)
    }

    /// Refused while resources or snapshot definitions exist
    pub async fn delete_rsc_dfn(&self, ctx: &AccessContext, name: &str) -> Result<()> {
        let name = ResourceName::new(name)?;
        let mut tx = self.begin().await;
        let key = live(&name);
        let dfn = tx.cache().require_rsc_dfn(&key)?.clone();
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(name.key()), AccessType::Control)?;

        let resources = tx.cache().resources_of(&key).len();
        if resources > 0 {
            return Err(Error::StillInUse {
                kind: "resource definition",
                name: name.to_string(),
                reason: format!("{} resources are deployed", resources),
            });
        }
        if let Some(snap) = tx.cache().rsc_dfns.keys().find(|k| k.rsc == name && k.snap.is_some()) {
            return Err(Error::StillInUse {
                kind: "resource definition",
                name: name.to_string(),
                reason: format!("snapshot {} exists", snap),
            });
        }

        let vlm_dfns: Vec<VlmDfnKey> = tx.cache().vlm_dfns_of(&key).iter().map(|d| d.key()).collect();
        for vlm_dfn in &vlm_dfns {
            self.remove_vlm_dfn(&mut tx, vlm_dfn)?;
        }
        self.remove_drbd_rsc_dfns(&mut tx, &key);
        self.remove_props(&mut tx, &rsc_dfn_instance(&name));
        self.remove_protection(&mut tx, &ObjectProtection::rsc_dfn_path(name.key()));
        tx.push(self.drivers.rsc_dfns.delete(&dfn));
        tx.cache_mut().rsc_dfns.remove(&key);
        tx.commit().await?;

        debug!("Deleted resource definition {}", name);
        Ok(())
    }

    pub async fn set_rsc_dfn_flags(&self, ctx: &AccessContext, name: &str, flags: RscDfnFlags) -> Result<()> {
        let key = live(&ResourceName::new(name)?);
        let mut tx = self.begin().await;
        tx.cache().require_rsc_dfn(&key)?;
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(key.rsc.key()), AccessType::Change)?;

        let driver = self.drivers.rsc_dfns.column_driver(&table::rsc_dfns::RESOURCE_FLAGS)?;
        let op = match tx.cache_mut().rsc_dfns.get_mut(&key) {
            Some(dfn) => driver.update(dfn, DbValue::Int(flags.bits() as i64))?,
            None => return Err(Error::Internal(format!("resource definition {} vanished", key))),
        };
        tx.push(op);
        tx.commit().await
    }

    /// Replace the DRBD shared secret; `None` clears it
    pub async fn set_drbd_secret(&self, ctx: &AccessContext, name: &str, secret: Option<&str>) -> Result<()> {
        let rsc = ResourceName::new(name)?;
        let mut tx = self.begin().await;
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(rsc.key()), AccessType::Change)?;

        let data_name = SuffixedResourceName::new(rsc, None, "");
        let driver = self.drivers.drbd_rsc_dfns.column_driver(&table::drbd_rsc_dfns::SECRET)?;
        let value = secret.map_or(DbValue::Null, DbValue::text);
        let op = match tx.cache_mut().drbd_rsc_dfns.get_mut(&data_name) {
            Some(data) => driver.update(data, value)?,
            None => {
                return Err(Error::NotFound {
                    kind: "DRBD resource definition data",
                    name: data_name.to_string(),
                })
            }
        };
        tx.push(op);
        tx.commit().await
    }

    pub(super) fn remove_drbd_rsc_dfns(&self, tx: &mut Transaction, rsc_dfn: &RscDfnKey) {
        let names: Vec<SuffixedResourceName> = tx
            .cache()
            .drbd_rsc_dfns
            .keys()
            .filter(|n| n.rsc == rsc_dfn.rsc && n.snap == rsc_dfn.snap)
            .cloned()
            .collect();
        for name in names {
            if let Some(data) = tx.cache_mut().drbd_rsc_dfns.remove(&name) {
                if let Some(port) = data.tcp_port {
                    tx.cache_mut().pools.tcp_port.release(port.value());
                }
                tx.push(self.drivers.drbd_rsc_dfns.delete(&data));
            }
        }
    }

    // =========================================================================
    // Volume Definitions
    // =========================================================================

    /// Create a volume definition and add the volume to every resource of
    /// the definition. `minor` claims a specific DRBD minor number.
    pub async fn create_vlm_dfn(
        &self,
        ctx: &AccessContext,
        rsc: &str,
        vlm_nr: i64,
        size_kib: u64,
        minor: Option<i64>,
    ) -> Result<VolumeDefinition> {
        let rsc = ResourceName::new(rsc)?;
        let vlm_nr = VolumeNumber::new(vlm_nr)?;
        let minor = minor.map(MinorNumber::new).transpose()?;
        let mut tx = self.begin().await;
        let rsc = tx.cache().require_rsc_dfn(&live(&rsc))?.name.clone();
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(rsc.key()), AccessType::Change)?;

        let key = VlmDfnKey {
            rsc: rsc.clone(),
            snap: None,
            vlm_nr,
        };
        if tx.cache().vlm_dfns.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "volume definition",
                name: key.to_string(),
            });
        }

        let dfn = VolumeDefinition {
            uuid: Uuid::new_v4(),
            rsc: rsc.clone(),
            snap: None,
            vlm_nr,
            size_kib,
            flags: VlmDfnFlags::empty(),
        };
        tx.push(self.drivers.vlm_dfns.upsert(&dfn));
        tx.cache_mut().vlm_dfns.insert(key, dfn.clone());

        let drbd_names: Vec<SuffixedResourceName> = tx
            .cache()
            .drbd_rsc_dfns
            .keys()
            .filter(|n| n.rsc == rsc && n.snap.is_none())
            .cloned()
            .collect();
        if let (Some(minor), true) = (minor, drbd_names.is_empty()) {
            return Err(Error::StackInvariant(format!(
                "resource definition {} has no DRBD layer to hold minor number {}",
                rsc,
                minor.value()
            )));
        }
        let mut requested = minor;
        for name in drbd_names {
            let minor = match requested.take() {
                Some(minor) => tx.allocate_minor_explicit(minor)?,
                None => tx.allocate_minor()?,
            };
            let data = DrbdVlmDfnData {
                name,
                vlm_nr,
                minor: Some(minor),
            };
            tx.push(self.drivers.drbd_vlm_dfns.upsert(&data));
            tx.cache_mut().drbd_vlm_dfns.insert((data.name.clone(), vlm_nr), data);
        }

        let resources: Vec<ResourceKey> = tx.cache().resources_of(&live(&rsc)).iter().map(|r| r.key()).collect();
        for resource in resources {
            let pool = self.resource_pool(&tx, &resource)?;
            self.insert_volume(&mut tx, &resource, vlm_nr)?;
            self.add_layer_volumes(&mut tx, &resource, vlm_nr, &pool)?;
        }
        tx.commit().await?;

        debug!("Created volume definition {} with {} KiB", dfn.key(), dfn.size_kib);
        Ok(dfn)
    }

    /// Delete a volume definition, its volumes and layer volumes, and
    /// release its minor numbers
    pub async fn delete_vlm_dfn(&self, ctx: &AccessContext, rsc: &str, vlm_nr: i64) -> Result<()> {
        let key = VlmDfnKey {
            rsc: ResourceName::new(rsc)?,
            snap: None,
            vlm_nr: VolumeNumber::new(vlm_nr)?,
        };
        let mut tx = self.begin().await;
        tx.cache().require_vlm_dfn(&key)?;
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(key.rsc.key()), AccessType::Change)?;
        self.remove_vlm_dfn(&mut tx, &key)?;
        tx.commit().await?;

        debug!("Deleted volume definition {}", key);
        Ok(())
    }

    pub async fn set_vlm_dfn_size(&self, ctx: &AccessContext, rsc: &str, vlm_nr: i64, size_kib: u64) -> Result<()> {
        let key = VlmDfnKey {
            rsc: ResourceName::new(rsc)?,
            snap: None,
            vlm_nr: VolumeNumber::new(vlm_nr)?,
        };
        let size = i64::try_from(size_kib).map_err(|e| Error::Parse {
            table: table::vlm_dfns::TABLE.name,
            column: table::vlm_dfns::VLM_SIZE.name,
            value: size_kib.to_string(),
            reason: e.to_string(),
        })?;
        let mut tx = self.begin().await;
        tx.cache().require_vlm_dfn(&key)?;
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(key.rsc.key()), AccessType::Change)?;

        let driver = self.drivers.vlm_dfns.column_driver(&table::vlm_dfns::VLM_SIZE)?;
        let op = match tx.cache_mut().vlm_dfns.get_mut(&key) {
            Some(dfn) => driver.update(dfn, DbValue::Int(size))?,
            None => return Err(Error::Internal(format!("volume definition {} vanished", key))),
        };
        tx.push(op);
        tx.commit().await
    }

    pub(super) fn remove_vlm_dfn(&self, tx: &mut Transaction, key: &VlmDfnKey) -> Result<()> {
        let dfn = tx.cache().require_vlm_dfn(key)?.clone();

        let resources: Vec<ResourceKey> = tx.cache().resources_of(&key.rsc_dfn()).iter().map(|r| r.key()).collect();
        for resource in resources {
            self.remove_layer_volumes(tx, &resource, key.vlm_nr);
            if let Some(volume) = tx.cache_mut().volumes.remove(&resource.volume(key.vlm_nr)) {
                tx.push(self.drivers.volumes.delete(&volume));
            }
        }

        let drbd_keys: Vec<_> = tx
            .cache()
            .drbd_vlm_dfns
            .keys()
            .filter(|(n, nr)| n.rsc == key.rsc && n.snap == key.snap && *nr == key.vlm_nr)
            .cloned()
            .collect();
        for drbd_key in drbd_keys {
            if let Some(data) = tx.cache_mut().drbd_vlm_dfns.remove(&drbd_key) {
                if let Some(minor) = data.minor {
                    tx.cache_mut().pools.minor.release(minor.value());
                }
                tx.push(self.drivers.drbd_vlm_dfns.delete(&data));
            }
        }

        if key.snap.is_none() {
            self.remove_props(tx, &vlm_dfn_instance(&key.rsc, key.vlm_nr));
        }
        tx.push(self.drivers.vlm_dfns.delete(&dfn));
        tx.cache_mut().vlm_dfns.remove(key);
        Ok(())
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Deploy a resource on a node with every volume placed in `pool`
    pub async fn create_resource(&self, ctx: &AccessContext, node: &str, rsc: &str, pool: &str) -> Result<Resource> {
        let node = NodeName::new(node)?;
        let rsc = ResourceName::new(rsc)?;
        let pool = StorPoolName::new(pool)?;
        let mut tx = self.begin().await;
        let dfn = tx.cache().require_rsc_dfn(&live(&rsc))?.clone();
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(rsc.key()), AccessType::Change)?;
        let node = tx.cache().require_node(&node)?.name.clone();
        let pool = tx.cache().require_stor_pool(&StorPoolKey::new(node.clone(), pool))?.clone();

        let key = ResourceKey::new(node.clone(), dfn.name.clone(), None);
        if tx.cache().resources.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "resource",
                name: key.to_string(),
            });
        }

        let mut flags = RscFlags::empty();
        if pool.provider == DeviceProviderKind::Diskless && dfn.layer_stack.contains(&DeviceLayerKind::Drbd) {
            flags.insert(RscFlags::DRBD_DISKLESS);
        }
        let resource = Resource {
            uuid: Uuid::new_v4(),
            node: node.clone(),
            rsc: dfn.name.clone(),
            snap: None,
            flags,
            create_timestamp: Some(now_millis()),
            layer_root: None,
        };
        tx.push(self.drivers.resources.upsert(&resource));
        tx.cache_mut().resources.insert(key.clone(), resource);

        self.create_layer_tree(&mut tx, &key, &dfn.layer_stack)?;
        self.put_prop(&mut tx, &resource_instance(&node, &dfn.name), STOR_POOL_PROP, pool.name.display())?;

        let vlm_nrs: Vec<VolumeNumber> = tx.cache().vlm_dfns_of(&dfn.key()).iter().map(|d| d.vlm_nr).collect();
        for vlm_nr in vlm_nrs {
            self.insert_volume(&mut tx, &key, vlm_nr)?;
            self.add_layer_volumes(&mut tx, &key, vlm_nr, &pool.key())?;
        }

        let created = tx.cache().require_resource(&key)?.clone();
        tx.commit().await?;

        debug!("Created resource {} in storage pool {}", key, pool.key());
        Ok(created)
    }

    pub async fn delete_resource(&self, ctx: &AccessContext, node: &str, rsc: &str) -> Result<()> {
        let key = ResourceKey::new(NodeName::new(node)?, ResourceName::new(rsc)?, None);
        let mut tx = self.begin().await;
        tx.cache().require_resource(&key)?;
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(key.rsc.key()), AccessType::Change)?;
        self.remove_resource(&mut tx, &key)?;
        tx.commit().await?;

        debug!("Deleted resource {}", key);
        Ok(())
    }

    pub async fn set_rsc_flags(&self, ctx: &AccessContext, node: &str, rsc: &str, flags: RscFlags) -> Result<()> {
        let key = ResourceKey::new(NodeName::new(node)?, ResourceName::new(rsc)?, None);
        let mut tx = self.begin().await;
        tx.cache().require_resource(&key)?;
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(key.rsc.key()), AccessType::Change)?;

        let driver = self.drivers.resources.column_driver(&table::resources::RESOURCE_FLAGS)?;
        let op = match tx.cache_mut().resources.get_mut(&key) {
            Some(resource) => driver.update(resource, DbValue::Int(flags.bits() as i64))?,
            None => return Err(Error::Internal(format!("resource {} vanished", key))),
        };
        tx.push(op);
        tx.commit().await
    }

    /// Remove a resource or snapshot with its volumes and layer tree
    pub(super) fn remove_resource(&self, tx: &mut Transaction, key: &ResourceKey) -> Result<()> {
        let resource = tx.cache().require_resource(key)?.clone();

        self.remove_layer_tree(tx, key);
        let volumes: Vec<Volume> = tx.cache().volumes_of(key).into_iter().cloned().collect();
        for volume in volumes {
            tx.push(self.drivers.volumes.delete(&volume));
            tx.cache_mut().volumes.remove(&volume.key());
        }
        if key.snap.is_none() {
            self.remove_props(tx, &resource_instance(&key.node, &key.rsc));
        }
        tx.push(self.drivers.resources.delete(&resource));
        tx.cache_mut().resources.remove(key);
        Ok(())
    }

    pub(super) fn insert_volume(&self, tx: &mut Transaction, rsc: &ResourceKey, vlm_nr: VolumeNumber) -> Result<()> {
        let resource = tx.cache().require_resource(rsc)?;
        let volume = Volume {
            uuid: Uuid::new_v4(),
            node: resource.node.clone(),
            rsc: resource.rsc.clone(),
            snap: resource.snap.clone(),
            vlm_nr,
            flags: VlmFlags::empty(),
        };
        tx.push(self.drivers.volumes.upsert(&volume));
        tx.cache_mut().volumes.insert(volume.key(), volume);
        Ok(())
    }

    /// Storage pool recorded on a live resource
    fn resource_pool(&self, tx: &Transaction, rsc: &ResourceKey) -> Result<StorPoolKey> {
        let instance = resource_instance(&rsc.node, &rsc.rsc);
        let name = tx
            .cache()
            .props
            .get(&(instance.clone(), STOR_POOL_PROP.to_string()))
            .ok_or_else(|| Error::NotFound {
                kind: "property",
                name: format!("{}:{}", instance, STOR_POOL_PROP),
            })?;
        let key = StorPoolKey::new(rsc.node.clone(), StorPoolName::new(name)?);
        Ok(tx.cache().require_stor_pool(&key)?.key())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Controller;
    use super::*;
    use crate::domain::names::{LayerId, NodeId};
    use crate::domain::layers::{LayerRscPayload, LayerVlmPayload};
    use crate::domain::objects::NodeType;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;

    async fn cluster(nodes: &[&str]) -> Controller {
        let controller = controller().await;
        for node in nodes {
            controller.create_node(&admin(), node, NodeType::Satellite).await.unwrap();
            controller
                .create_stor_pool(&admin(), node, "thin", DeviceProviderKind::LvmThin)
                .await
                .unwrap();
        }
        controller
    }

    fn minor_of(cache: &crate::cache::ObjectCache, rsc: &str, vlm_nr: i64) -> Option<MinorNumber> {
        let name = SuffixedResourceName::new(ResourceName::new(rsc).unwrap(), None, "");
        cache
            .drbd_vlm_dfns
            .get(&(name, VolumeNumber::new(vlm_nr).unwrap()))
            .and_then(|d| d.minor)
    }

    #[tokio::test]
    async fn test_rsc_dfn_allocates_tcp_port() {
        let controller = cluster(&[]).await;
        let ctx = admin();
        use DeviceLayerKind::*;

        controller.create_rsc_dfn(&ctx, "rscA", &[Drbd, Storage]).await.unwrap();
        controller.create_rsc_dfn(&ctx, "rscB", &[Drbd, Luks, Storage]).await.unwrap();
        controller.create_rsc_dfn(&ctx, "rscC", &[Storage]).await.unwrap();
        assert_matches!(
            controller.create_rsc_dfn(&ctx, "rscD", &[Storage, Drbd]).await,
            Err(Error::StackInvariant(_))
        );
        assert_matches!(
            controller.create_rsc_dfn(&ctx, "RSCA", &[Storage]).await,
            Err(Error::AlreadyExists { .. })
        );

        controller.reload().await.unwrap();
        let snapshot = controller.snapshot().await;
        let ports: Vec<_> = snapshot.drbd_rsc_dfns.iter().filter_map(|d| d.tcp_port).map(|p| p.value()).collect();
        assert_eq!(ports, vec![7000, 7001]);
        assert_eq!(snapshot.tcp_ports, vec![7000, 7001]);
        assert!(snapshot.drbd_rsc_dfns.iter().all(|d| d.secret.is_some()));

        controller.delete_rsc_dfn(&ctx, "rscA").await.unwrap();
        controller.reload().await.unwrap();
        assert_eq!(controller.snapshot().await.tcp_ports, vec![7001]);
    }

    #[tokio::test]
    async fn test_resource_layer_tree() {
        let controller = cluster(&["alpha", "beta"]).await;
        let ctx = admin();
        use DeviceLayerKind::*;

        controller.create_rsc_dfn(&ctx, "rscA", &[Drbd, Luks, Storage]).await.unwrap();
        controller.create_vlm_dfn(&ctx, "rscA", 0, 1 << 20, None).await.unwrap();
        let alpha = controller.create_resource(&ctx, "alpha", "rscA", "thin").await.unwrap();
        let beta = controller.create_resource(&ctx, "beta", "rscA", "thin").await.unwrap();
        assert_eq!(alpha.create_timestamp.map(|t| t.timestamp_subsec_nanos() % 1_000_000), Some(0));
        controller.create_vlm_dfn(&ctx, "rscA", 1, 1 << 10, None).await.unwrap();

        controller.reload().await.unwrap();
        let cache = controller.read().await;
        for (rsc, node_id) in [(&alpha, 0), (&beta, 1)] {
            let tree = cache.layer_tree(&rsc.key());
            let kinds: Vec<_> = tree.iter().map(|l| l.kind()).collect();
            assert_eq!(kinds, vec![Drbd, Luks, Storage]);
            assert_eq!(tree[0].parent, None);
            assert_eq!(tree[1].parent, Some(tree[0].id));
            assert_eq!(tree[2].parent, Some(tree[1].id));
            assert!(tree[2].children.is_empty());
            assert_eq!(tree[0].drbd().map(|d| d.node_id), Some(NodeId::new(node_id).unwrap()));
            for layer in &tree {
                assert_eq!(layer.volumes.len(), 2);
            }
            assert_matches!(
                &tree[2].volumes[&VolumeNumber::new(1).unwrap()].payload,
                LayerVlmPayload::Storage { provider: DeviceProviderKind::LvmThin, .. }
            );
            assert_eq!(cache.volumes_of(&rsc.key()).len(), 2);
        }
        assert_eq!(cache.pools.layer_id.len(), 6);
        assert!(minor_of(&cache, "rscA", 0).is_some());
        assert!(minor_of(&cache, "rscA", 1).is_some());
    }

    #[tokio::test]
    async fn test_delete_resource_releases_layer_ids() {
        let controller = cluster(&["alpha"]).await;
        let ctx = admin();
        controller
            .create_rsc_dfn(&ctx, "rscA", &[DeviceLayerKind::Nvme, DeviceLayerKind::Storage])
            .await
            .unwrap();
        controller.create_vlm_dfn(&ctx, "rscA", 0, 4096, None).await.unwrap();
        controller.create_resource(&ctx, "alpha", "rscA", "thin").await.unwrap();

        assert_matches!(
            controller.delete_stor_pool(&ctx, "alpha", "thin").await,
            Err(Error::StillInUse { .. })
        );
        assert_matches!(
            controller.delete_rsc_dfn(&ctx, "rscA").await,
            Err(Error::StillInUse { .. })
        );

        controller.delete_resource(&ctx, "alpha", "rscA").await.unwrap();
        controller.reload().await.unwrap();
        let snapshot = controller.snapshot().await;
        assert!(snapshot.layers.is_empty());
        assert!(snapshot.layer_ids.is_empty());
        assert!(snapshot.volumes.is_empty());
        assert!(snapshot.props.is_empty());

        controller.delete_rsc_dfn(&ctx, "rscA").await.unwrap();
        controller.delete_stor_pool(&ctx, "alpha", "thin").await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_minor_collision() {
        let controller = cluster(&[]).await;
        let ctx = admin();
        use DeviceLayerKind::*;
        controller.create_rsc_dfn(&ctx, "rscA", &[Drbd, Storage]).await.unwrap();
        controller.create_rsc_dfn(&ctx, "rscB", &[Drbd, Storage]).await.unwrap();

        controller.create_vlm_dfn(&ctx, "rscA", 0, 1024, Some(1234)).await.unwrap();
        assert_matches!(
            controller.create_vlm_dfn(&ctx, "rscB", 0, 1024, Some(1234)).await,
            Err(Error::ValueInUse { value: 1234, .. })
        );
        let cache = controller.read().await;
        assert!(cache.vlm_dfns_of(&RscDfnKey::new(ResourceName::new("rscB").unwrap(), None)).is_empty());
        assert_eq!(minor_of(&cache, "rscA", 0), Some(MinorNumber::new(1234).unwrap()));
    }

    #[tokio::test]
    async fn test_explicit_minor_needs_drbd() {
        let controller = cluster(&[]).await;
        let ctx = admin();
        controller
            .create_rsc_dfn(&ctx, "rscA", &[DeviceLayerKind::Storage])
            .await
            .unwrap();

        let result = controller.create_vlm_dfn(&ctx, "rscA", 0, 1024, Some(1234)).await;
        assert_matches!(result, Err(ref e) if e.kind() == ErrorKind::Invalid);
        controller.reload().await.unwrap();
        let snapshot = controller.snapshot().await;
        assert!(snapshot.vlm_dfns.is_empty());
        assert!(snapshot.minors.is_empty());

        controller.create_vlm_dfn(&ctx, "rscA", 0, 1024, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_stor_pool_prop_is_reserved() {
        let controller = cluster(&["alpha"]).await;
        let ctx = admin();
        controller
            .create_rsc_dfn(&ctx, "rscA", &[DeviceLayerKind::Storage])
            .await
            .unwrap();
        controller.create_resource(&ctx, "alpha", "rscA", "thin").await.unwrap();

        controller
            .set_prop(&ctx, "/RESOURCES/ALPHA/RSCA", "Aux/owner", "ops")
            .await
            .unwrap();
        assert_matches!(
            controller.remove_prop(&ctx, "/RESOURCES/ALPHA/RSCA", STOR_POOL_PROP).await,
            Err(Error::StillInUse { kind: "property", .. })
        );
        assert!(controller
            .remove_prop(&ctx, "/RESOURCES/ALPHA/RSCA", "Aux/owner")
            .await
            .unwrap());
        assert_eq!(
            controller.read().await.props_of("/RESOURCES/ALPHA/RSCA"),
            vec![(STOR_POOL_PROP, "thin")]
        );
    }

    #[tokio::test]
    async fn test_single_column_updates() {
        let controller = cluster(&["alpha"]).await;
        let ctx = admin();
        controller
            .create_rsc_dfn(&ctx, "rscA", &[DeviceLayerKind::Drbd, DeviceLayerKind::Storage])
            .await
            .unwrap();
        controller.create_vlm_dfn(&ctx, "rscA", 0, 1024, None).await.unwrap();
        let rsc = controller.create_resource(&ctx, "alpha", "rscA", "thin").await.unwrap();
        let root = rsc.layer_root.unwrap();

        controller.set_vlm_dfn_size(&ctx, "rscA", 0, 2048).await.unwrap();
        controller.set_rsc_flags(&ctx, "alpha", "rscA", RscFlags::INACTIVE).await.unwrap();
        controller.set_rsc_dfn_flags(&ctx, "rscA", RscDfnFlags::DELETE).await.unwrap();
        controller.set_drbd_secret(&ctx, "rscA", Some("hunter2")).await.unwrap();
        controller.set_layer_suspend_io(&ctx, root, true).await.unwrap();
        assert_matches!(
            controller.set_layer_suspend_io(&ctx, LayerId::new(999).unwrap(), true).await,
            Err(Error::NotFound { .. })
        );

        controller.reload().await.unwrap();
        let cache = controller.read().await;
        let vlm_dfn = cache.vlm_dfns.values().next().unwrap();
        assert_eq!(vlm_dfn.size_kib, 2048);
        assert_eq!(cache.require_resource(&rsc.key()).unwrap().flags, RscFlags::INACTIVE);
        assert_eq!(
            cache.require_rsc_dfn(&RscDfnKey::new(rsc.rsc.clone(), None)).unwrap().flags,
            RscDfnFlags::DELETE
        );
        assert_eq!(
            cache.drbd_rsc_dfns.values().next().and_then(|d| d.secret.clone()),
            Some("hunter2".to_string())
        );
        let layer = cache.require_layer(root).unwrap();
        assert!(layer.suspend_io);
        assert_matches!(layer.payload, LayerRscPayload::Drbd(_));
    }

    #[tokio::test]
    async fn test_diskless_resource_flag() {
        let controller = cluster(&["alpha"]).await;
        let ctx = admin();
        controller
            .create_stor_pool(&ctx, "alpha", "none", DeviceProviderKind::Diskless)
            .await
            .unwrap();
        controller
            .create_rsc_dfn(&ctx, "rscA", &[DeviceLayerKind::Drbd, DeviceLayerKind::Storage])
            .await
            .unwrap();
        let rsc = controller.create_resource(&ctx, "alpha", "rscA", "none").await.unwrap();
        assert!(rsc.flags.contains(RscFlags::DRBD_DISKLESS));
        assert_matches!(
            controller.create_resource(&ctx, "alpha", "rscA", "thin").await,
            Err(Error::AlreadyExists { kind: "resource", .. })
        );
    }
}

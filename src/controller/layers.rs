//! Layer tree assembly
//!
//! New resources get one layer object per entry of their definition's layer
//! stack, root first, each with a freshly allocated layer id. Layer volumes
//! follow the resource's volumes; NVMe volumes exist in memory only.

use super::Controller;
use crate::db::table;
use crate::db::value::DbValue;
use crate::domain::layers::{
    DeviceLayerKind, DrbdRscData, LayerRscObject, LayerRscPayload, LayerVlmObject, LayerVlmPayload,
};
use crate::domain::names::{LayerId, NodeId, SuffixedResourceName, VolumeNumber};
use crate::domain::objects::{ResourceKey, StorPoolKey};
use crate::domain::security::{AccessContext, AccessType, ObjectProtection};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::trace;
use uuid::Uuid;

/// Random LUKS volume key material
fn new_volume_key() -> String {
    hex::encode(Sha256::digest(Uuid::new_v4().as_bytes()))
}

impl Controller {
    /// Build the layer tree of `rsc` and link its root
    pub(super) fn create_layer_tree(
        &self,
        tx: &mut Transaction,
        rsc: &ResourceKey,
        stack: &[DeviceLayerKind],
    ) -> Result<LayerId> {
        let mut root = None;
        let mut parent: Option<LayerId> = None;

        for kind in stack {
            let id = tx.allocate_layer_id()?;
            let payload = match kind {
                DeviceLayerKind::Drbd => LayerRscPayload::Drbd(self.new_drbd_rsc_data(tx, rsc)?),
                other => LayerRscPayload::without_table(*other)
                    .ok_or_else(|| Error::Internal(format!("no payload for layer kind {}", other)))?,
            };
            let layer = LayerRscObject::new(id, rsc.clone(), "", parent, payload);
            self.insert_layer(tx, layer)?;

            trace!("Created {} layer resource {} of {}", kind, id, rsc);
            root.get_or_insert(id);
            parent = Some(id);
        }

        let root = root.ok_or_else(|| Error::StackInvariant(format!("{} has an empty layer stack", rsc)))?;
        self.link_root(tx, rsc, root)?;
        Ok(root)
    }

    /// Copy the layer tree of `from` onto `to` with new layer ids
    pub(super) fn copy_layer_tree(&self, tx: &mut Transaction, from: &ResourceKey, to: &ResourceKey) -> Result<()> {
        let source: Vec<LayerRscObject> = tx.cache().layer_tree(from).into_iter().cloned().collect();
        let mut ids: BTreeMap<LayerId, LayerId> = BTreeMap::new();

        for layer in source {
            let id = tx.allocate_layer_id()?;
            let parent = match layer.parent {
                Some(old) => Some(*ids.get(&old).ok_or_else(|| {
                    Error::StackInvariant(format!("parent {} of layer resource {} not copied", old, layer.id))
                })?),
                None => None,
            };
            ids.insert(layer.id, id);

            let mut copy = LayerRscObject::new(id, to.clone(), layer.suffix, parent, layer.payload);
            copy.suspend_io = layer.suspend_io;
            copy.volumes = layer
                .volumes
                .into_values()
                .map(|vlm| {
                    (
                        vlm.vlm_nr,
                        LayerVlmObject {
                            layer_id: id,
                            ..vlm
                        },
                    )
                })
                .collect();
            for vlm in copy.volumes.values() {
                if let Some(registry) = self.drivers.layer_vlms(vlm.kind()) {
                    tx.push(registry.upsert(vlm));
                }
            }
            self.insert_layer(tx, copy)?;
            if parent.is_none() {
                self.link_root(tx, to, id)?;
            }
        }
        Ok(())
    }

    /// Persist and cache one layer object, registering it with its parent
    fn insert_layer(&self, tx: &mut Transaction, layer: LayerRscObject) -> Result<()> {
        if let Some(parent) = layer.parent {
            match tx.cache_mut().layers.get_mut(&parent) {
                Some(parent) => {
                    parent.children.insert(layer.id);
                }
                None => {
                    return Err(Error::StackInvariant(format!(
                        "parent {} of layer resource {} does not exist",
                        parent, layer.id
                    )));
                }
            }
        }
        tx.push(self.drivers.layer_ids.upsert(&layer));
        if layer.kind() == DeviceLayerKind::Drbd {
            tx.push(self.drivers.drbd_rscs.upsert(&layer));
        }
        tx.cache_mut().layers.insert(layer.id, layer);
        Ok(())
    }

    fn link_root(&self, tx: &mut Transaction, rsc: &ResourceKey, root: LayerId) -> Result<()> {
        match tx.cache_mut().resources.get_mut(rsc) {
            Some(resource) => {
                resource.layer_root = Some(root);
                Ok(())
            }
            None => Err(Error::NotFound {
                kind: "resource",
                name: rsc.to_string(),
            }),
        }
    }

    /// Per-resource DRBD data with the lowest node id unused within the
    /// resource definition
    fn new_drbd_rsc_data(&self, tx: &Transaction, rsc: &ResourceKey) -> Result<DrbdRscData> {
        let name = SuffixedResourceName::new(rsc.rsc.clone(), rsc.snap.clone(), "");
        let dfn = tx.cache().drbd_rsc_dfns.get(&name).ok_or_else(|| Error::NotFound {
            kind: "DRBD resource definition data",
            name: name.to_string(),
        })?;

        let used: Vec<u32> = tx
            .cache()
            .layers
            .values()
            .filter(|l| l.suffixed_name() == name)
            .filter_map(|l| l.drbd())
            .map(|d| d.node_id.value())
            .collect();
        let node_id = (NodeId::MIN..=NodeId::MAX)
            .find(|id| !used.contains(id))
            .ok_or(Error::PoolExhausted {
                pool: "DRBD node id",
                min: NodeId::MIN,
                max: NodeId::MAX,
            })?;

        Ok(DrbdRscData {
            node_id: NodeId::new(i64::from(node_id))?,
            peer_slots: dfn.peer_slots,
            al_stripes: dfn.al_stripes,
            al_stripe_size_kib: dfn.al_stripe_size_kib,
            flags: 0,
        })
    }

    // =========================================================================
    // Layer Volumes
    // =========================================================================

    /// Add volume `vlm_nr` to every layer of `rsc`, backed by `pool`
    pub(super) fn add_layer_volumes(
        &self,
        tx: &mut Transaction,
        rsc: &ResourceKey,
        vlm_nr: VolumeNumber,
        pool: &StorPoolKey,
    ) -> Result<()> {
        let provider = tx.cache().require_stor_pool(pool)?.provider;
        let layers: Vec<(LayerId, DeviceLayerKind)> =
            tx.cache().layer_tree(rsc).iter().map(|l| (l.id, l.kind())).collect();

        for (layer_id, kind) in layers {
            let payload = match kind {
                DeviceLayerKind::Drbd => LayerVlmPayload::Drbd { meta_pool: None },
                DeviceLayerKind::Luks => LayerVlmPayload::Luks {
                    encrypted_password: new_volume_key(),
                },
                DeviceLayerKind::Storage => LayerVlmPayload::Storage {
                    provider,
                    pool: pool.clone(),
                },
                DeviceLayerKind::Nvme => LayerVlmPayload::Nvme,
                DeviceLayerKind::Writecache => LayerVlmPayload::Writecache {
                    cache_pool: pool.clone(),
                },
                DeviceLayerKind::Cache => LayerVlmPayload::Cache {
                    cache_pool: pool.clone(),
                    meta_pool: pool.clone(),
                },
                DeviceLayerKind::Bcache => LayerVlmPayload::Bcache {
                    cache_pool: pool.clone(),
                    dev_uuid: None,
                },
            };
            let vlm = LayerVlmObject {
                layer_id,
                vlm_nr,
                payload,
            };
            if let Some(registry) = self.drivers.layer_vlms(kind) {
                tx.push(registry.upsert(&vlm));
            }
            if let Some(layer) = tx.cache_mut().layers.get_mut(&layer_id) {
                layer.volumes.insert(vlm_nr, vlm);
            }
        }
        Ok(())
    }

    /// Remove volume `vlm_nr` from every layer of `rsc`
    pub(super) fn remove_layer_volumes(&self, tx: &mut Transaction, rsc: &ResourceKey, vlm_nr: VolumeNumber) {
        let layers: Vec<LayerId> = tx.cache().layers_of(rsc).iter().map(|l| l.id).collect();
        for layer_id in layers {
            let removed = tx
                .cache_mut()
                .layers
                .get_mut(&layer_id)
                .and_then(|layer| layer.volumes.remove(&vlm_nr));
            if let Some(vlm) = removed {
                if let Some(registry) = self.drivers.layer_vlms(vlm.kind()) {
                    tx.push(registry.delete(&vlm));
                }
            }
        }
    }

    /// Delete every layer object of `rsc` and release the layer ids
    pub(super) fn remove_layer_tree(&self, tx: &mut Transaction, rsc: &ResourceKey) {
        let layers: Vec<LayerId> = tx.cache().layers_of(rsc).iter().map(|l| l.id).collect();
        for layer_id in layers {
            let Some(layer) = tx.cache_mut().layers.remove(&layer_id) else {
                continue;
            };
            for vlm in layer.volumes.values() {
                if let Some(registry) = self.drivers.layer_vlms(vlm.kind()) {
                    tx.push(registry.delete(vlm));
                }
            }
            if layer.kind() == DeviceLayerKind::Drbd {
                tx.push(self.drivers.drbd_rscs.delete(&layer));
            }
            tx.push(self.drivers.layer_ids.delete(&layer));
            tx.cache_mut().pools.layer_id.release(layer_id.value());
        }
        if let Some(resource) = tx.cache_mut().resources.get_mut(rsc) {
            resource.layer_root = None;
        }
    }

    // =========================================================================
    // Single Column Updates
    // =========================================================================

    pub async fn set_layer_suspend_io(&self, ctx: &AccessContext, layer_id: LayerId, suspend: bool) -> Result<()> {
        let mut tx = self.begin().await;
        let owner = tx.cache().require_layer(layer_id)?.owner.clone();
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(owner.rsc.key()), AccessType::Change)?;

        let driver = self
            .drivers
            .layer_ids
            .column_driver(&table::layer_rsc_ids::LAYER_RESOURCE_SUSPENDED)?;
        let op = match tx.cache_mut().layers.get_mut(&layer_id) {
            Some(layer) => driver.update(layer, DbValue::Bool(suspend))?,
            None => return Err(Error::Internal(format!("layer resource {} vanished", layer_id))),
        };
        tx.push(op);
        tx.commit().await
    }
}

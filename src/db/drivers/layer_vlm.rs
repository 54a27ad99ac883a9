//! Layer volume drivers
//!
//! One table per layer kind that persists per-volume data. Every row is keyed
//! by (layer resource id, volume number); storage pool references are
//! resolved against the loaded pools and stay back-references.

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{resolve_stor_pool, unresolved};
use crate::db::raw::RawRow;
use crate::db::table::{bcache_vlms, cache_vlms, drbd_vlms, luks_vlms, storage_vlms, writecache_vlms};
use crate::db::value::DbValue;
use crate::domain::layers::{DeviceLayerKind, LayerVlmObject, LayerVlmPayload};
use crate::domain::names::{LayerId, VolumeNumber};
use crate::domain::objects::{DeviceProviderKind, StorPoolKey};
use crate::error::{Error, Result};

fn layer_id(v: &LayerVlmObject) -> DbValue {
    DbValue::Int(i64::from(v.layer_id))
}

fn vlm_nr(v: &LayerVlmObject) -> DbValue {
    DbValue::Int(i64::from(v.vlm_nr))
}

fn id(v: &LayerVlmObject) -> String {
    format!("{} {}/{}", v.kind(), v.layer_id, v.vlm_nr)
}

fn pool_node(pool: Option<&StorPoolKey>) -> DbValue {
    DbValue::opt_text(pool.map(|p| p.node.key()))
}

fn pool_name(pool: Option<&StorPoolKey>) -> DbValue {
    DbValue::opt_text(pool.map(|p| p.pool.key()))
}

// =============================================================================
// Registries
// =============================================================================

pub fn drbd_registry() -> ColumnRegistry<LayerVlmObject> {
    use drbd_vlms::*;

    fn meta_pool(v: &LayerVlmObject) -> Option<&StorPoolKey> {
        match &v.payload {
            LayerVlmPayload::Drbd { meta_pool } => meta_pool.as_ref(),
            _ => None,
        }
    }

    ColumnRegistry::new(&TABLE, id)
        .register(LAYER_RESOURCE_ID, layer_id)
        .register(VLM_NR, vlm_nr)
        .register(NODE_NAME, |v| pool_node(meta_pool(v)))
        .register(POOL_NAME, |v| pool_name(meta_pool(v)))
}

pub fn luks_registry() -> ColumnRegistry<LayerVlmObject> {
    use luks_vlms::*;

    ColumnRegistry::new(&TABLE, id)
        .register(LAYER_RESOURCE_ID, layer_id)
        .register(VLM_NR, vlm_nr)
        .register(ENCRYPTED_PASSWORD, |v| match &v.payload {
            LayerVlmPayload::Luks { encrypted_password } => DbValue::text(encrypted_password),
            _ => DbValue::Null,
        })
}

pub fn storage_registry() -> ColumnRegistry<LayerVlmObject> {
    use storage_vlms::*;

    fn pool(v: &LayerVlmObject) -> Option<&StorPoolKey> {
        match &v.payload {
            LayerVlmPayload::Storage { pool, .. } => Some(pool),
            _ => None,
        }
    }

    ColumnRegistry::new(&TABLE, id)
        .register(LAYER_RESOURCE_ID, layer_id)
        .register(VLM_NR, vlm_nr)
        .register(PROVIDER_KIND, |v| match &v.payload {
            LayerVlmPayload::Storage { provider, .. } => DbValue::text(provider.as_str()),
            _ => DbValue::Null,
        })
        .register(NODE_NAME, |v| pool_node(pool(v)))
        .register(STOR_POOL_NAME, |v| pool_name(pool(v)))
}

pub fn writecache_registry() -> ColumnRegistry<LayerVlmObject> {
    use writecache_vlms::*;

    fn pool(v: &LayerVlmObject) -> Option<&StorPoolKey> {
        match &v.payload {
            LayerVlmPayload::Writecache { cache_pool } => Some(cache_pool),
            _ => None,
        }
    }

    ColumnRegistry::new(&TABLE, id)
        .register(LAYER_RESOURCE_ID, layer_id)
        .register(VLM_NR, vlm_nr)
        .register(NODE_NAME, |v| pool_node(pool(v)))
        .register(POOL_NAME, |v| pool_name(pool(v)))
}

pub fn cache_registry() -> ColumnRegistry<LayerVlmObject> {
    use cache_vlms::*;

    fn pools(v: &LayerVlmObject) -> (Option<&StorPoolKey>, Option<&StorPoolKey>) {
        match &v.payload {
            LayerVlmPayload::Cache { cache_pool, meta_pool } => (Some(cache_pool), Some(meta_pool)),
            _ => (None, None),
        }
    }

    ColumnRegistry::new(&TABLE, id)
        .register(LAYER_RESOURCE_ID, layer_id)
        .register(VLM_NR, vlm_nr)
        .register(NODE_NAME, |v| pool_node(pools(v).0))
        .register(POOL_NAME_CACHE, |v| pool_name(pools(v).0))
        .register(POOL_NAME_META, |v| pool_name(pools(v).1))
}

pub fn bcache_registry() -> ColumnRegistry<LayerVlmObject> {
    use bcache_vlms::*;

    fn pool(v: &LayerVlmObject) -> Option<&StorPoolKey> {
        match &v.payload {
            LayerVlmPayload::Bcache { cache_pool, .. } => Some(cache_pool),
            _ => None,
        }
    }

    ColumnRegistry::new(&TABLE, id)
        .register(LAYER_RESOURCE_ID, layer_id)
        .register(VLM_NR, vlm_nr)
        .register(NODE_NAME, |v| pool_node(pool(v)))
        .register(POOL_NAME, |v| pool_name(pool(v)))
        .register(DEV_UUID, |v| match &v.payload {
            LayerVlmPayload::Bcache { dev_uuid, .. } => DbValue::opt_text(dev_uuid.as_deref()),
            _ => DbValue::Null,
        })
}

// =============================================================================
// Load
// =============================================================================

/// Load one row of the per-volume table of `kind`. Requires the layer
/// resource object of the same kind, the owner's volume and every referenced
/// storage pool.
pub fn load(kind: DeviceLayerKind, row: &RawRow, cache: &ObjectCache) -> Result<LayerVlmObject> {
    let id_col = row
        .table()
        .column("LAYER_RESOURCE_ID")
        .ok_or_else(|| Error::Internal(format!("{} has no layer resource id", row.table())))?;
    let vlm_col = row
        .table()
        .column("VLM_NR")
        .ok_or_else(|| Error::Internal(format!("{} has no volume number", row.table())))?;

    let layer_id = row.build_int_required(id_col, LayerId::new)?;
    let layer = match cache.layers.get(&layer_id) {
        Some(layer) if layer.kind() == kind => layer,
        _ => return Err(unresolved(row, format!("{} layer resource {}", kind, layer_id))),
    };

    let vlm_nr = row.build_int_required(vlm_col, VolumeNumber::new)?;
    let volume = layer.owner.volume(vlm_nr);
    if !cache.volumes.contains_key(&volume) {
        return Err(unresolved(row, format!("volume {}", volume)));
    }

    let payload = match kind {
        DeviceLayerKind::Drbd => {
            use drbd_vlms::*;
            let meta_pool = if row.get(&POOL_NAME).is_null() {
                None
            } else {
                Some(resolve_stor_pool(row, &NODE_NAME, &POOL_NAME, cache)?)
            };
            LayerVlmPayload::Drbd { meta_pool }
        }
        DeviceLayerKind::Luks => LayerVlmPayload::Luks {
            encrypted_password: row.get_string(&luks_vlms::ENCRYPTED_PASSWORD)?,
        },
        DeviceLayerKind::Storage => {
            use storage_vlms::*;
            LayerVlmPayload::Storage {
                provider: row.get_parsed::<DeviceProviderKind>(&PROVIDER_KIND)?,
                pool: resolve_stor_pool(row, &NODE_NAME, &STOR_POOL_NAME, cache)?,
            }
        }
        DeviceLayerKind::Writecache => {
            use writecache_vlms::*;
            LayerVlmPayload::Writecache {
                cache_pool: resolve_stor_pool(row, &NODE_NAME, &POOL_NAME, cache)?,
            }
        }
        DeviceLayerKind::Cache => {
            use cache_vlms::*;
            LayerVlmPayload::Cache {
                cache_pool: resolve_stor_pool(row, &NODE_NAME, &POOL_NAME_CACHE, cache)?,
                meta_pool: resolve_stor_pool(row, &NODE_NAME, &POOL_NAME_META, cache)?,
            }
        }
        DeviceLayerKind::Bcache => {
            use bcache_vlms::*;
            LayerVlmPayload::Bcache {
                cache_pool: resolve_stor_pool(row, &NODE_NAME, &POOL_NAME, cache)?,
                dev_uuid: row.get_opt_string(&DEV_UUID)?,
            }
        }
        DeviceLayerKind::Nvme => {
            return Err(Error::Internal("NVME layer has no volume table".to_string()));
        }
    };

    Ok(LayerVlmObject {
        layer_id,
        vlm_nr,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layers::{LayerRscObject, LayerRscPayload};
    use crate::domain::names::{NodeName, ResourceName, StorPoolName};
    use crate::domain::objects::{ResourceKey, StorPool, Volume, VlmFlags};
    use crate::numberpool::NumberPoolsConfig;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn setup() -> (ObjectCache, ResourceKey, StorPoolKey) {
        let mut cache = ObjectCache::new(&NumberPoolsConfig::default());
        let node = NodeName::new("alpha").unwrap();
        let owner = ResourceKey::new(node.clone(), ResourceName::new("rscA").unwrap(), None);
        let pool = StorPoolKey::new(node.clone(), StorPoolName::new("thin").unwrap());

        cache.stor_pools.insert(
            pool.clone(),
            StorPool {
                uuid: Uuid::new_v4(),
                node: node.clone(),
                name: pool.pool.clone(),
                provider: DeviceProviderKind::LvmThin,
                free_space_mgr: "thin".into(),
            },
        );
        let vlm_nr = VolumeNumber::new(0).unwrap();
        cache.volumes.insert(
            owner.volume(vlm_nr),
            Volume {
                uuid: Uuid::new_v4(),
                node,
                rsc: owner.rsc.clone(),
                snap: None,
                vlm_nr,
                flags: VlmFlags::empty(),
            },
        );
        let id = LayerId::new(1).unwrap();
        cache
            .layers
            .insert(id, LayerRscObject::new(id, owner.clone(), "", None, LayerRscPayload::Storage));
        (cache, owner, pool)
    }

    fn storage_vlm(pool: &StorPoolKey, vlm: i64) -> LayerVlmObject {
        LayerVlmObject {
            layer_id: LayerId::new(1).unwrap(),
            vlm_nr: VolumeNumber::new(vlm).unwrap(),
            payload: LayerVlmPayload::Storage {
                provider: DeviceProviderKind::LvmThin,
                pool: pool.clone(),
            },
        }
    }

    fn to_row(values: crate::db::value::RowValues) -> RawRow {
        RawRow::new(&storage_vlms::TABLE, values.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn test_storage_volume_round_trip() {
        let (cache, _, pool) = setup();
        let vlm = storage_vlm(&pool, 0);
        let row = to_row(storage_registry().values(&vlm));
        assert_eq!(load(DeviceLayerKind::Storage, &row, &cache).unwrap(), vlm);
    }

    #[test]
    fn test_unresolved_references() {
        let (cache, _, pool) = setup();

        let row = to_row(storage_registry().values(&storage_vlm(&pool, 1)));
        assert_matches!(
            load(DeviceLayerKind::Storage, &row, &cache),
            Err(Error::UnresolvableReference { .. })
        );

        let other = StorPoolKey::new(pool.node.clone(), StorPoolName::new("ghost").unwrap());
        let row = to_row(storage_registry().values(&storage_vlm(&other, 0)));
        assert_matches!(
            load(DeviceLayerKind::Storage, &row, &cache),
            Err(Error::UnresolvableReference { .. })
        );

        // Layer 1 is a STORAGE layer, not a DRBD layer
        let drbd = LayerVlmObject {
            layer_id: LayerId::new(1).unwrap(),
            vlm_nr: VolumeNumber::new(0).unwrap(),
            payload: LayerVlmPayload::Drbd { meta_pool: None },
        };
        let values = drbd_registry().values(&drbd);
        let row = RawRow::new(&drbd_vlms::TABLE, values.into_iter().map(|(k, v)| (k.to_string(), v)).collect());
        assert_matches!(
            load(DeviceLayerKind::Drbd, &row, &cache),
            Err(Error::UnresolvableReference { .. })
        );
    }

    #[test]
    fn test_drbd_internal_metadata_is_null() {
        let drbd = LayerVlmObject {
            layer_id: LayerId::new(4).unwrap(),
            vlm_nr: VolumeNumber::new(0).unwrap(),
            payload: LayerVlmPayload::Drbd { meta_pool: None },
        };
        let values = drbd_registry().values(&drbd);
        assert_eq!(values["NODE_NAME"], DbValue::Null);
        assert_eq!(values["POOL_NAME"], DbValue::Null);
    }
}

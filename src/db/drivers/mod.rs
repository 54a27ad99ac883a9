//! Entity Database Drivers
//!
//! One driver per table. A driver couples a [`ColumnRegistry`] (entity ->
//! column values, used for every write) with a `load` function (raw row plus
//! already-loaded objects -> entity). Loads resolve foreign keys against the
//! [`ObjectCache`] and fail with [`Error::UnresolvableReference`] when a
//! referenced object is absent.

pub mod drbd;
pub mod layer_id;
pub mod layer_vlm;
pub mod node;
pub mod props;
pub mod protection;
pub mod resource;
pub mod rsc_dfn;
pub mod stor_pool;
pub mod vlm_dfn;
pub mod volume;

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::raw::RawRow;
use crate::db::table::Column;
use crate::db::value::DbValue;
use crate::domain::layers::{
    DeviceLayerKind, DrbdRscDfnData, DrbdVlmDfnData, LayerRscObject, LayerVlmObject,
};
use crate::domain::names::{NodeName, ResourceName, StorPoolName};
use crate::domain::objects::{
    Node, Resource, ResourceDefinition, RscDfnKey, StorPool, StorPoolKey, Volume, VolumeDefinition,
};
use crate::domain::security::ObjectProtection;
use crate::error::{Error, Result};
use std::fmt::Display;

pub use props::Prop;
pub use protection::AclEntry;

// =============================================================================
// Reference Resolution
// =============================================================================

pub(crate) fn unresolved(row: &RawRow, reference: impl Display) -> Error {
    Error::UnresolvableReference {
        table: row.table().name,
        key: row.key(),
        reference: reference.to_string(),
    }
}

/// Resolve a node name column against the loaded nodes. The returned name
/// carries the node's display spelling.
pub(crate) fn resolve_node(row: &RawRow, col: &Column, cache: &ObjectCache) -> Result<NodeName> {
    let name = row.build_required(col, NodeName::new)?;
    cache
        .nodes
        .get(&name)
        .map(|node| node.name.clone())
        .ok_or_else(|| unresolved(row, format!("node {}", name)))
}

/// Resolve a (resource name, snapshot name) column pair against the loaded
/// resource and snapshot definitions
pub(crate) fn resolve_rsc_dfn(
    row: &RawRow,
    rsc_col: &Column,
    snap_col: &Column,
    cache: &ObjectCache,
) -> Result<RscDfnKey> {
    let rsc = row.build_required(rsc_col, ResourceName::new)?;
    let snap = row.snapshot_name(snap_col)?;
    let key = RscDfnKey::new(rsc, snap);
    cache
        .rsc_dfns
        .get(&key)
        .map(|dfn| dfn.key())
        .ok_or_else(|| unresolved(row, format!("resource definition {}", key)))
}

/// Resolve a (node name, pool name) column pair against the loaded storage
/// pools
pub(crate) fn resolve_stor_pool(
    row: &RawRow,
    node_col: &Column,
    pool_col: &Column,
    cache: &ObjectCache,
) -> Result<StorPoolKey> {
    let node = row.build_required(node_col, NodeName::new)?;
    let pool = row.build_required(pool_col, StorPoolName::new)?;
    let key = StorPoolKey::new(node, pool);
    cache
        .stor_pools
        .get(&key)
        .map(StorPool::key)
        .ok_or_else(|| unresolved(row, format!("storage pool {}", key)))
}

/// Integer carried by a value handed to a column setter
pub(crate) fn int_value(value: &DbValue) -> Result<i64> {
    match value {
        DbValue::Int(i) => Ok(*i),
        DbValue::Text(s) => s
            .parse()
            .map_err(|_| Error::Internal(format!("'{}' is not an integer", s))),
        other => Err(Error::Internal(format!("'{}' is not an integer", other))),
    }
}

/// Restore a flag set, rejecting unknown bits
pub(crate) fn parse_flags<T>(kind: &'static str, bits: i64, from_bits: fn(u64) -> Option<T>) -> Result<T> {
    u64::try_from(bits)
        .ok()
        .and_then(from_bits)
        .ok_or_else(|| Error::InvalidName {
            kind,
            value: format!("{:#x}", bits),
            reason: "unknown flag bits".to_string(),
        })
}

// =============================================================================
// Driver Set
// =============================================================================

/// Column registries of every table, built once at startup
pub struct DbDrivers {
    pub protections: ColumnRegistry<ObjectProtection>,
    pub acl: ColumnRegistry<AclEntry>,
    pub nodes: ColumnRegistry<Node>,
    pub stor_pools: ColumnRegistry<StorPool>,
    pub props: ColumnRegistry<Prop>,
    pub rsc_dfns: ColumnRegistry<ResourceDefinition>,
    pub resources: ColumnRegistry<Resource>,
    pub vlm_dfns: ColumnRegistry<VolumeDefinition>,
    pub volumes: ColumnRegistry<Volume>,
    pub drbd_rsc_dfns: ColumnRegistry<DrbdRscDfnData>,
    pub drbd_vlm_dfns: ColumnRegistry<DrbdVlmDfnData>,
    pub layer_ids: ColumnRegistry<LayerRscObject>,
    pub drbd_rscs: ColumnRegistry<LayerRscObject>,
    pub drbd_vlms: ColumnRegistry<LayerVlmObject>,
    pub luks_vlms: ColumnRegistry<LayerVlmObject>,
    pub storage_vlms: ColumnRegistry<LayerVlmObject>,
    pub writecache_vlms: ColumnRegistry<LayerVlmObject>,
    pub cache_vlms: ColumnRegistry<LayerVlmObject>,
    pub bcache_vlms: ColumnRegistry<LayerVlmObject>,
}

impl DbDrivers {
    /// Build every registry and check that each maps its whole table
    pub fn new() -> Result<Self> {
        let drivers = Self {
            protections: protection::registry(),
            acl: protection::acl_registry(),
            nodes: node::registry(),
            stor_pools: stor_pool::registry(),
            props: props::registry(),
            rsc_dfns: rsc_dfn::registry(),
            resources: resource::registry(),
            vlm_dfns: vlm_dfn::registry(),
            volumes: volume::registry(),
            drbd_rsc_dfns: drbd::rsc_dfn_registry(),
            drbd_vlm_dfns: drbd::vlm_dfn_registry(),
            layer_ids: layer_id::registry(),
            drbd_rscs: drbd::rsc_registry(),
            drbd_vlms: layer_vlm::drbd_registry(),
            luks_vlms: layer_vlm::luks_registry(),
            storage_vlms: layer_vlm::storage_registry(),
            writecache_vlms: layer_vlm::writecache_registry(),
            cache_vlms: layer_vlm::cache_registry(),
            bcache_vlms: layer_vlm::bcache_registry(),
        };

        drivers.protections.ensure_complete()?;
        drivers.acl.ensure_complete()?;
        drivers.nodes.ensure_complete()?;
        drivers.stor_pools.ensure_complete()?;
        drivers.props.ensure_complete()?;
        drivers.rsc_dfns.ensure_complete()?;
        drivers.resources.ensure_complete()?;
        drivers.vlm_dfns.ensure_complete()?;
        drivers.volumes.ensure_complete()?;
        drivers.drbd_rsc_dfns.ensure_complete()?;
        drivers.drbd_vlm_dfns.ensure_complete()?;
        drivers.layer_ids.ensure_complete()?;
        drivers.drbd_rscs.ensure_complete()?;
        for kind in DeviceLayerKind::ALL {
            if let Some(registry) = drivers.layer_vlms(kind) {
                registry.ensure_complete()?;
            }
        }
        Ok(drivers)
    }

    /// Registry of the per-volume table of a layer kind; `None` for kinds
    /// without one
    pub fn layer_vlms(&self, kind: DeviceLayerKind) -> Option<&ColumnRegistry<LayerVlmObject>> {
        match kind {
            DeviceLayerKind::Drbd => Some(&self.drbd_vlms),
            DeviceLayerKind::Luks => Some(&self.luks_vlms),
            DeviceLayerKind::Storage => Some(&self.storage_vlms),
            DeviceLayerKind::Writecache => Some(&self.writecache_vlms),
            DeviceLayerKind::Cache => Some(&self.cache_vlms),
            DeviceLayerKind::Bcache => Some(&self.bcache_vlms),
            DeviceLayerKind::Nvme => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registry_complete() {
        let drivers = DbDrivers::new().unwrap();
        for kind in DeviceLayerKind::ALL {
            assert_eq!(drivers.layer_vlms(kind).is_some(), kind.has_volume_table());
        }
    }
}

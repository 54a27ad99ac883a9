//! Layer-Stack Loader
//!
//! The full load pass. Every table is fetched once, then rows are turned into
//! entities in strict dependency order:
//!
//! ```text
//!   protections -> nodes -> storage pools -> props
//!     -> resource / snapshot definitions -> resources / snapshots
//!     -> volume definitions -> volumes
//!     -> DRBD definition data (re-claims TCP ports and minors)
//!     -> layer ids (placeholders, re-claims layer ids)
//!     -> layer resource objects, root first
//!     -> layer volume objects, per kind
//! ```
//!
//! The pass builds a fresh [`ObjectCache`]; the caller swaps it in only when
//! the whole pass succeeded, so a partial graph is never exposed.

use crate::cache::ObjectCache;
use crate::db::drivers::layer_id::LayerPlaceholder;
use crate::db::drivers::{
    drbd, layer_id, layer_vlm, node, props, protection, resource, rsc_dfn, stor_pool, unresolved,
    vlm_dfn, volume,
};
use crate::db::engine::SharedEngine;
use crate::db::raw::{RawRow, NO_SNAPSHOT};
use crate::db::table::{self, Table, ALL_TABLES};
use crate::db::value::DbValue;
use crate::domain::layers::{DeviceLayerKind, DrbdRscData, LayerRscPayload, LayerVlmObject, LayerVlmPayload};
use crate::domain::names::LayerId;
use crate::error::{Error, Result};
use crate::metrics::DbMetrics;
use crate::numberpool::NumberPoolsConfig;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

type Rows = BTreeMap<&'static str, Vec<RawRow>>;

/// Per-volume tables in load order
static LAYER_VLM_TABLES: [(DeviceLayerKind, &Table); 6] = [
    (DeviceLayerKind::Drbd, &table::drbd_vlms::TABLE),
    (DeviceLayerKind::Luks, &table::luks_vlms::TABLE),
    (DeviceLayerKind::Storage, &table::storage_vlms::TABLE),
    (DeviceLayerKind::Writecache, &table::writecache_vlms::TABLE),
    (DeviceLayerKind::Cache, &table::cache_vlms::TABLE),
    (DeviceLayerKind::Bcache, &table::bcache_vlms::TABLE),
];

/// Run `load` on every row and hand each entity to `insert`; any failure is
/// wrapped with the row's table and key
fn each_row<T>(
    rows: &[RawRow],
    cache: &mut ObjectCache,
    load: impl Fn(&RawRow, &ObjectCache) -> Result<T>,
    mut insert: impl FnMut(&mut ObjectCache, T) -> Result<()>,
) -> Result<()> {
    for row in rows {
        load(row, cache)
            .and_then(|entity| insert(cache, entity))
            .map_err(|e| e.in_row(row.table().name, row.key()))?;
    }
    Ok(())
}

fn take(rows: &mut Rows, table: &Table) -> Vec<RawRow> {
    rows.remove(table.name).unwrap_or_default()
}

/// Full load pass over one engine
pub struct DatabaseLoader {
    engine: SharedEngine,
    pools: NumberPoolsConfig,
    metrics: DbMetrics,
}

impl DatabaseLoader {
    pub fn new(engine: SharedEngine, pools: NumberPoolsConfig, metrics: DbMetrics) -> Self {
        Self { engine, pools, metrics }
    }

    /// Read every table and build the object graph
    pub async fn load(&self) -> Result<ObjectCache> {
        let start = Instant::now();
        info!("Loading database through {} engine", self.engine.name());

        let fetched = try_join_all(ALL_TABLES.iter().map(|t| self.engine.load_all(*t))).await?;
        let mut rows: Rows = BTreeMap::new();
        for (table, table_rows) in ALL_TABLES.iter().zip(fetched) {
            debug!("Read {} rows from {}", table_rows.len(), table.name);
            self.metrics.record_rows(table.name, table_rows.len());
            rows.insert(table.name, table_rows);
        }

        let mut cache = ObjectCache::new(&self.pools);
        load_entities(&mut rows, &mut cache)?;
        load_drbd_definitions(&mut rows, &mut cache)?;
        load_layers(&mut rows, &mut cache)?;
        load_layer_volumes(&mut rows, &mut cache)?;
        synthesize_nvme_volumes(&mut cache);
        verify_layer_stacks(&cache)?;
        cache.commit();

        info!(
            "Database loaded in {:?}: {} nodes, {} storage pools, {} resource definitions, {} resources, {} layer objects",
            start.elapsed(),
            cache.nodes.len(),
            cache.stor_pools.len(),
            cache.rsc_dfns.len(),
            cache.resources.len(),
            cache.layers.len()
        );
        Ok(cache)
    }
}

// =============================================================================
// Entities
// =============================================================================

fn is_live(row: &RawRow) -> bool {
    match row.get(&table::rsc_dfns::SNAPSHOT_NAME) {
        DbValue::Null => true,
        DbValue::Text(s) => s == NO_SNAPSHOT,
        _ => false,
    }
}

fn load_entities(rows: &mut Rows, cache: &mut ObjectCache) -> Result<()> {
    each_row(
        &take(rows, &table::sec_object_protection::TABLE),
        cache,
        protection::load,
        |cache, p| {
            cache.protections.insert(p.object_path.clone(), p);
            Ok(())
        },
    )?;
    each_row(
        &take(rows, &table::sec_acl_map::TABLE),
        cache,
        protection::load_acl,
        |cache, entry| {
            if let Some(p) = cache.protections.get_mut(&entry.object_path) {
                p.acl.insert(entry.role, entry.access);
            }
            Ok(())
        },
    )?;
    each_row(&take(rows, &table::nodes::TABLE), cache, node::load, |cache, n| {
        cache.nodes.insert(n.name.clone(), n);
        Ok(())
    })?;
    each_row(&take(rows, &table::stor_pools::TABLE), cache, stor_pool::load, |cache, p| {
        cache.stor_pools.insert(p.key(), p);
        Ok(())
    })?;
    each_row(&take(rows, &table::props::TABLE), cache, props::load, |cache, p| {
        cache.props.insert((p.instance, p.key), p.value);
        Ok(())
    })?;

    // Snapshot definitions resolve their resource definition
    let (live, snapshots): (Vec<RawRow>, Vec<RawRow>) =
        take(rows, &table::rsc_dfns::TABLE).into_iter().partition(is_live);
    for dfn_rows in [live, snapshots] {
        each_row(&dfn_rows, cache, rsc_dfn::load, |cache, d| {
            cache.rsc_dfns.insert(d.key(), d);
            Ok(())
        })?;
    }

    each_row(&take(rows, &table::resources::TABLE), cache, resource::load, |cache, r| {
        cache.resources.insert(r.key(), r);
        Ok(())
    })?;
    each_row(&take(rows, &table::vlm_dfns::TABLE), cache, vlm_dfn::load, |cache, d| {
        cache.vlm_dfns.insert(d.key(), d);
        Ok(())
    })?;
    each_row(&take(rows, &table::volumes::TABLE), cache, volume::load, |cache, v| {
        cache.volumes.insert(v.key(), v);
        Ok(())
    })?;
    Ok(())
}

// =============================================================================
// DRBD Definition Data
// =============================================================================

fn load_drbd_definitions(rows: &mut Rows, cache: &mut ObjectCache) -> Result<()> {
    each_row(
        &take(rows, &table::drbd_rsc_dfns::TABLE),
        cache,
        drbd::load_rsc_dfn,
        |cache, data| {
            if let Some(port) = data.tcp_port {
                cache.pools.tcp_port.allocate_explicit(port.value())?;
            }
            cache.drbd_rsc_dfns.insert(data.name.clone(), data);
            Ok(())
        },
    )?;
    each_row(
        &take(rows, &table::drbd_vlm_dfns::TABLE),
        cache,
        drbd::load_vlm_dfn,
        |cache, data| {
            if let Some(minor) = data.minor {
                cache.pools.minor.allocate_explicit(minor.value())?;
            }
            cache.drbd_vlm_dfns.insert((data.name.clone(), data.vlm_nr), data);
            Ok(())
        },
    )
}

// =============================================================================
// Layer Resource Objects
// =============================================================================

/// Pass 1: placeholders keyed by layer id. Pass 2: exchange them for real
/// objects, parents before children.
fn load_layers(rows: &mut Rows, cache: &mut ObjectCache) -> Result<()> {
    let id_rows = take(rows, &table::layer_rsc_ids::TABLE);
    let mut placeholders: BTreeMap<LayerId, (LayerPlaceholder, &RawRow)> = BTreeMap::new();
    for row in &id_rows {
        let placeholder = layer_id::load(row, cache)
            .and_then(|p| {
                cache.pools.layer_id.allocate_explicit(p.id.value())?;
                Ok(p)
            })
            .map_err(|e| e.in_row(row.table().name, row.key()))?;
        placeholders.insert(placeholder.id, (placeholder, row));
    }

    let mut drbd_data: BTreeMap<LayerId, DrbdRscData> = BTreeMap::new();
    for row in &take(rows, &table::drbd_rscs::TABLE) {
        let (id, data) = drbd::load_rsc(row)
            .and_then(|(id, data)| match placeholders.get(&id) {
                Some((p, _)) if p.kind == DeviceLayerKind::Drbd => Ok((id, data)),
                _ => Err(unresolved(row, format!("DRBD layer resource {}", id))),
            })
            .map_err(|e| e.in_row(row.table().name, row.key()))?;
        drbd_data.insert(id, data);
    }

    for id in depth_order(&placeholders)? {
        let Some((placeholder, row)) = placeholders.remove(&id) else {
            continue;
        };
        attach_layer(cache, placeholder, &mut drbd_data).map_err(|e| e.in_row(row.table().name, row.key()))?;
    }
    Ok(())
}

/// Layer ids sorted by depth, then id; fails on missing parents and cycles
fn depth_order(placeholders: &BTreeMap<LayerId, (LayerPlaceholder, &RawRow)>) -> Result<Vec<LayerId>> {
    let mut depths: Vec<(usize, LayerId)> = Vec::with_capacity(placeholders.len());
    for (id, (placeholder, row)) in placeholders {
        let mut depth = 0;
        let mut parent = placeholder.parent;
        while let Some(parent_id) = parent {
            let Some((parent_placeholder, _)) = placeholders.get(&parent_id) else {
                return Err(unresolved(row, format!("parent layer resource {}", parent_id))
                    .in_row(row.table().name, row.key()));
            };
            depth += 1;
            if depth > placeholders.len() {
                return Err(Error::StackInvariant(format!("layer resource {} is part of a cycle", id)));
            }
            parent = parent_placeholder.parent;
        }
        depths.push((depth, *id));
    }
    depths.sort();
    Ok(depths.into_iter().map(|(_, id)| id).collect())
}

fn attach_layer(
    cache: &mut ObjectCache,
    placeholder: LayerPlaceholder,
    drbd_data: &mut BTreeMap<LayerId, DrbdRscData>,
) -> Result<()> {
    let id = placeholder.id;
    let payload = match LayerRscPayload::without_table(placeholder.kind) {
        Some(payload) => payload,
        None => LayerRscPayload::Drbd(drbd_data.remove(&id).ok_or_else(|| {
            Error::StackInvariant(format!("DRBD layer resource {} has no DRBD resource data", id))
        })?),
    };

    match placeholder.parent {
        Some(parent_id) => {
            let parent = cache.layers.get_mut(&parent_id).ok_or_else(|| {
                Error::StackInvariant(format!("parent {} of layer resource {} is not loaded", parent_id, id))
            })?;
            if parent.owner != placeholder.owner {
                return Err(Error::StackInvariant(format!(
                    "layer resource {} of {} has parent {} of {}",
                    id, placeholder.owner, parent_id, parent.owner
                )));
            }
            parent.children.insert(id);
        }
        None => {
            let owner = cache.resources.get_mut(&placeholder.owner).ok_or_else(|| {
                Error::StackInvariant(format!("owner {} of layer resource {} is not loaded", placeholder.owner, id))
            })?;
            if let Some(existing) = owner.layer_root {
                return Err(Error::StackInvariant(format!(
                    "{} has two root layers, {} and {}",
                    placeholder.owner, existing, id
                )));
            }
            owner.layer_root = Some(id);
        }
    }

    cache.layers.insert(id, placeholder.into_object(payload));
    Ok(())
}

// =============================================================================
// Layer Volume Objects
// =============================================================================

fn load_layer_volumes(rows: &mut Rows, cache: &mut ObjectCache) -> Result<()> {
    for (kind, vlm_table) in LAYER_VLM_TABLES {
        each_row(
            &take(rows, vlm_table),
            cache,
            |row, cache| layer_vlm::load(kind, row, cache),
            |cache, vlm| {
                if let Some(layer) = cache.layers.get_mut(&vlm.layer_id) {
                    layer.volumes.insert(vlm.vlm_nr, vlm);
                }
                Ok(())
            },
        )?;
    }
    Ok(())
}

/// NVMe layers persist no per-volume rows: every volume of the owning
/// resource gets one entry
fn synthesize_nvme_volumes(cache: &mut ObjectCache) {
    let nvme_layers: Vec<_> = cache
        .layers
        .values()
        .filter(|l| l.kind() == DeviceLayerKind::Nvme)
        .map(|l| (l.id, l.owner.clone()))
        .collect();

    for (id, owner) in nvme_layers {
        let vlm_nrs: Vec<_> = cache.volumes_of(&owner).iter().map(|v| v.vlm_nr).collect();
        if let Some(layer) = cache.layers.get_mut(&id) {
            for vlm_nr in vlm_nrs {
                layer.volumes.insert(
                    vlm_nr,
                    LayerVlmObject {
                        layer_id: id,
                        vlm_nr,
                        payload: LayerVlmPayload::Nvme,
                    },
                );
            }
        }
    }
}

/// Every layer object hangs below its owner's root and every leaf is a
/// physical storage layer
fn verify_layer_stacks(cache: &ObjectCache) -> Result<()> {
    for rsc in cache.resources.values() {
        let key = rsc.key();
        let owned = cache.layers_of(&key).len();
        let tree = cache.layer_tree(&key);
        if tree.len() != owned {
            return Err(Error::StackInvariant(format!(
                "{} owns {} layer resources but only {} are reachable from its root",
                key,
                owned,
                tree.len()
            )));
        }
        for layer in tree {
            let is_leaf = layer.children.is_empty();
            if is_leaf != layer.kind().is_physical_storage() {
                return Err(Error::StackInvariant(format!(
                    "{} layer resource {} of {} {} a leaf",
                    layer.kind(),
                    layer.id,
                    key,
                    if is_leaf { "is" } else { "is not" }
                )));
            }
        }
    }
    Ok(())
}

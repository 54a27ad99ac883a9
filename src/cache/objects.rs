//! Object Cache
//!
//! The single owning structure of the in-memory object graph. Entities are
//! addressed by natural composite keys; layer objects by [`LayerId`]. Links
//! between entities are keys, never references.

use crate::cache::txmap::TransactionalMap;
use crate::domain::layers::{DrbdRscDfnData, DrbdVlmDfnData, LayerRscObject, LayerVlmPayload};
use crate::domain::names::{LayerId, NodeName, SuffixedResourceName, VolumeNumber};
use crate::domain::objects::{
    Node, Resource, ResourceDefinition, ResourceKey, RscDfnKey, StorPool, StorPoolKey, VlmDfnKey,
    Volume, VolumeDefinition, VolumeKey,
};
use crate::domain::security::ObjectProtection;
use crate::error::{Error, Result};
use crate::numberpool::{NumberPools, NumberPoolsConfig};
use serde::Serialize;
use uuid::Uuid;

/// (props instance path, property key)
pub type PropKey = (String, String);

/// (suffixed resource name, volume number)
pub type DrbdVlmDfnKey = (SuffixedResourceName, VolumeNumber);

// =============================================================================
// Object Cache
// =============================================================================

/// Identity maps of every loaded or created entity, plus the number pools
#[derive(Debug, Clone)]
pub struct ObjectCache {
    pub protections: TransactionalMap<String, ObjectProtection>,
    pub nodes: TransactionalMap<NodeName, Node>,
    pub stor_pools: TransactionalMap<StorPoolKey, StorPool>,
    pub props: TransactionalMap<PropKey, String>,
    pub rsc_dfns: TransactionalMap<RscDfnKey, ResourceDefinition>,
    pub vlm_dfns: TransactionalMap<VlmDfnKey, VolumeDefinition>,
    pub resources: TransactionalMap<ResourceKey, Resource>,
    pub volumes: TransactionalMap<VolumeKey, Volume>,
    pub drbd_rsc_dfns: TransactionalMap<SuffixedResourceName, DrbdRscDfnData>,
    pub drbd_vlm_dfns: TransactionalMap<DrbdVlmDfnKey, DrbdVlmDfnData>,
    pub layers: TransactionalMap<LayerId, LayerRscObject>,
    pub pools: NumberPools,
}

fn not_found(kind: &'static str, name: impl ToString) -> Error {
    Error::NotFound {
        kind,
        name: name.to_string(),
    }
}

impl ObjectCache {
    pub fn new(pools: &NumberPoolsConfig) -> Self {
        Self {
            protections: TransactionalMap::new(),
            nodes: TransactionalMap::new(),
            stor_pools: TransactionalMap::new(),
            props: TransactionalMap::new(),
            rsc_dfns: TransactionalMap::new(),
            vlm_dfns: TransactionalMap::new(),
            resources: TransactionalMap::new(),
            volumes: TransactionalMap::new(),
            drbd_rsc_dfns: TransactionalMap::new(),
            drbd_vlm_dfns: TransactionalMap::new(),
            layers: TransactionalMap::new(),
            pools: NumberPools::new(pools),
        }
    }

    // =========================================================================
    // Transaction Boundary
    // =========================================================================

    pub fn is_dirty(&self) -> bool {
        self.protections.is_dirty()
            || self.nodes.is_dirty()
            || self.stor_pools.is_dirty()
            || self.props.is_dirty()
            || self.rsc_dfns.is_dirty()
            || self.vlm_dfns.is_dirty()
            || self.resources.is_dirty()
            || self.volumes.is_dirty()
            || self.drbd_rsc_dfns.is_dirty()
            || self.drbd_vlm_dfns.is_dirty()
            || self.layers.is_dirty()
            || self.pools.minor.is_dirty()
            || self.pools.tcp_port.is_dirty()
            || self.pools.layer_id.is_dirty()
    }

    pub fn commit(&mut self) {
        self.protections.commit();
        self.nodes.commit();
        self.stor_pools.commit();
        self.props.commit();
        self.rsc_dfns.commit();
        self.vlm_dfns.commit();
        self.resources.commit();
        self.volumes.commit();
        self.drbd_rsc_dfns.commit();
        self.drbd_vlm_dfns.commit();
        self.layers.commit();
        self.pools.commit();
    }

    pub fn rollback(&mut self) {
        self.protections.rollback();
        self.nodes.rollback();
        self.stor_pools.rollback();
        self.props.rollback();
        self.rsc_dfns.rollback();
        self.vlm_dfns.rollback();
        self.resources.rollback();
        self.volumes.rollback();
        self.drbd_rsc_dfns.rollback();
        self.drbd_vlm_dfns.rollback();
        self.layers.rollback();
        self.pools.rollback();
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn require_protection(&self, path: &str) -> Result<&ObjectProtection> {
        self.protections
            .get(&path.to_string())
            .ok_or_else(|| not_found("object protection", path))
    }

    pub fn require_node(&self, name: &NodeName) -> Result<&Node> {
        self.nodes.get(name).ok_or_else(|| not_found("node", name))
    }

    pub fn require_stor_pool(&self, key: &StorPoolKey) -> Result<&StorPool> {
        self.stor_pools.get(key).ok_or_else(|| not_found("storage pool", key))
    }

    pub fn require_rsc_dfn(&self, key: &RscDfnKey) -> Result<&ResourceDefinition> {
        let kind = if key.snap.is_some() {
            "snapshot definition"
        } else {
            "resource definition"
        };
        self.rsc_dfns.get(key).ok_or_else(|| not_found(kind, key))
    }

    pub fn require_vlm_dfn(&self, key: &VlmDfnKey) -> Result<&VolumeDefinition> {
        self.vlm_dfns.get(key).ok_or_else(|| not_found("volume definition", key))
    }

    pub fn require_resource(&self, key: &ResourceKey) -> Result<&Resource> {
        let kind = if key.snap.is_some() { "snapshot" } else { "resource" };
        self.resources.get(key).ok_or_else(|| not_found(kind, key))
    }

    pub fn require_volume(&self, key: &VolumeKey) -> Result<&Volume> {
        self.volumes.get(key).ok_or_else(|| not_found("volume", key))
    }

    pub fn require_layer(&self, id: LayerId) -> Result<&LayerRscObject> {
        self.layers.get(&id).ok_or_else(|| not_found("layer resource", id))
    }

    pub fn vlm_dfns_of(&self, rsc_dfn: &RscDfnKey) -> Vec<&VolumeDefinition> {
        self.vlm_dfns
            .values()
            .filter(|v| v.rsc == rsc_dfn.rsc && v.snap == rsc_dfn.snap)
            .collect()
    }

    pub fn resources_of(&self, rsc_dfn: &RscDfnKey) -> Vec<&Resource> {
        self.resources
            .values()
            .filter(|r| r.rsc == rsc_dfn.rsc && r.snap == rsc_dfn.snap)
            .collect()
    }

    /// Live resources and snapshots placed on a node
    pub fn resources_on(&self, node: &NodeName) -> Vec<&Resource> {
        self.resources.values().filter(|r| &r.node == node).collect()
    }

    pub fn volumes_of(&self, rsc: &ResourceKey) -> Vec<&Volume> {
        self.volumes
            .values()
            .filter(|v| v.node == rsc.node && v.rsc == rsc.rsc && v.snap == rsc.snap)
            .collect()
    }

    /// Layer objects of one resource, root first, then depth by depth
    pub fn layer_tree(&self, rsc: &ResourceKey) -> Vec<&LayerRscObject> {
        let mut tree = Vec::new();
        let root = self.resources.get(rsc).and_then(|r| r.layer_root);
        let mut frontier: Vec<LayerId> = root.into_iter().collect();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for id in frontier {
                if let Some(layer) = self.layers.get(&id) {
                    next.extend(layer.children.iter().copied());
                    tree.push(layer);
                }
            }
            frontier = next;
        }
        tree
    }

    /// Layer objects owned by a resource, in id order
    pub fn layers_of(&self, rsc: &ResourceKey) -> Vec<&LayerRscObject> {
        self.layers.values().filter(|l| &l.owner == rsc).collect()
    }

    /// Layer volumes of any resource that reference the pool
    pub fn pool_users(&self, pool: &StorPoolKey) -> Vec<(LayerId, VolumeNumber)> {
        self.layers
            .values()
            .flat_map(|l| l.volumes.values())
            .filter(|v| v.payload.referenced_pools().contains(&pool))
            .map(|v| (v.layer_id, v.vlm_nr))
            .collect()
    }

    pub fn props_of(&self, instance: &str) -> Vec<(&str, &str)> {
        self.props
            .iter()
            .filter(|((inst, _), _)| inst == instance)
            .map(|((_, key), value)| (key.as_str(), value.as_str()))
            .collect()
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Value copy of the whole graph, for comparison and dumps
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            protections: self.protections.values().cloned().collect(),
            nodes: self.nodes.values().cloned().collect(),
            stor_pools: self.stor_pools.values().cloned().collect(),
            props: self
                .props
                .iter()
                .map(|((inst, key), value)| (inst.clone(), key.clone(), value.clone()))
                .collect(),
            rsc_dfns: self.rsc_dfns.values().cloned().collect(),
            vlm_dfns: self.vlm_dfns.values().cloned().collect(),
            resources: self.resources.values().cloned().collect(),
            volumes: self.volumes.values().cloned().collect(),
            drbd_rsc_dfns: self.drbd_rsc_dfns.values().cloned().collect(),
            drbd_vlm_dfns: self.drbd_vlm_dfns.values().cloned().collect(),
            layers: self.layers.values().cloned().collect(),
            minors: self.pools.minor.allocated().collect(),
            tcp_ports: self.pools.tcp_port.allocated().collect(),
            layer_ids: self.pools.layer_id.allocated().collect(),
        }
    }
}

/// Ordered value copy of an [`ObjectCache`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub protections: Vec<ObjectProtection>,
    pub nodes: Vec<Node>,
    pub stor_pools: Vec<StorPool>,
    pub props: Vec<(String, String, String)>,
    pub rsc_dfns: Vec<ResourceDefinition>,
    pub vlm_dfns: Vec<VolumeDefinition>,
    pub resources: Vec<Resource>,
    pub volumes: Vec<Volume>,
    pub drbd_rsc_dfns: Vec<DrbdRscDfnData>,
    pub drbd_vlm_dfns: Vec<DrbdVlmDfnData>,
    pub layers: Vec<LayerRscObject>,
    pub minors: Vec<u32>,
    pub tcp_ports: Vec<u32>,
    pub layer_ids: Vec<u32>,
}

impl GraphSnapshot {
    /// Blank every randomly generated value: UUIDs, timestamps, DRBD secrets
    /// and LUKS volume keys
    pub fn without_generated(mut self) -> Self {
        for node in &mut self.nodes {
            node.uuid = Uuid::nil();
        }
        for pool in &mut self.stor_pools {
            pool.uuid = Uuid::nil();
        }
        for dfn in &mut self.rsc_dfns {
            dfn.uuid = Uuid::nil();
        }
        for dfn in &mut self.vlm_dfns {
            dfn.uuid = Uuid::nil();
        }
        for rsc in &mut self.resources {
            rsc.uuid = Uuid::nil();
            rsc.create_timestamp = None;
        }
        for vlm in &mut self.volumes {
            vlm.uuid = Uuid::nil();
        }
        for data in &mut self.drbd_rsc_dfns {
            data.secret = None;
        }
        for layer in &mut self.layers {
            for vlm in layer.volumes.values_mut() {
                if let LayerVlmPayload::Luks { encrypted_password } = &mut vlm.payload {
                    encrypted_password.clear();
                }
            }
        }
        self
    }

    /// Total number of entities, excluding pool values
    pub fn entity_count(&self) -> usize {
        self.protections.len()
            + self.nodes.len()
            + self.stor_pools.len()
            + self.props.len()
            + self.rsc_dfns.len()
            + self.vlm_dfns.len()
            + self.resources.len()
            + self.volumes.len()
            + self.drbd_rsc_dfns.len()
            + self.drbd_vlm_dfns.len()
            + self.layers.len()
    }
}

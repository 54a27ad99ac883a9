//! Device Layers
//!
//! A resource is implemented as a stack of device layers. Each layer kind is a
//! closed variant with its own per-resource and per-volume payload; the layer
//! objects of one resource form a tree addressed by [`LayerId`].
//!
//! ```text
//!   DRBD      (root, parent = None)
//!    └─ LUKS
//!        └─ STORAGE   (physical storage, no children)
//! ```

use crate::domain::names::{LayerId, MinorNumber, NodeId, SuffixedResourceName, TcpPortNumber, VolumeNumber};
use crate::domain::objects::{DeviceProviderKind, ResourceKey, StorPoolKey};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// Layer Kind
// =============================================================================

/// One stage of a resource's storage stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceLayerKind {
    /// Replication
    Drbd,
    /// Encryption
    Luks,
    /// Physical storage
    Storage,
    /// Transport (NVMe-oF export)
    Nvme,
    /// Write cache
    Writecache,
    /// dm-cache
    Cache,
    /// Block cache
    Bcache,
}

impl DeviceLayerKind {
    pub const ALL: [DeviceLayerKind; 7] = [
        DeviceLayerKind::Drbd,
        DeviceLayerKind::Luks,
        DeviceLayerKind::Storage,
        DeviceLayerKind::Nvme,
        DeviceLayerKind::Writecache,
        DeviceLayerKind::Cache,
        DeviceLayerKind::Bcache,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceLayerKind::Drbd => "DRBD",
            DeviceLayerKind::Luks => "LUKS",
            DeviceLayerKind::Storage => "STORAGE",
            DeviceLayerKind::Nvme => "NVME",
            DeviceLayerKind::Writecache => "WRITECACHE",
            DeviceLayerKind::Cache => "CACHE",
            DeviceLayerKind::Bcache => "BCACHE",
        }
    }

    /// Whether this kind may (and must) terminate a layer stack
    pub fn is_physical_storage(self) -> bool {
        matches!(self, DeviceLayerKind::Storage)
    }

    /// Whether per-volume rows of this kind are persisted. NVMe has no table;
    /// its volumes are synthesized from the owning resource on load.
    pub fn has_volume_table(self) -> bool {
        !matches!(self, DeviceLayerKind::Nvme)
    }
}

impl fmt::Display for DeviceLayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeviceLayerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceLayerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidName {
                kind: "layer kind",
                value: s.to_string(),
                reason: "unknown device layer kind".to_string(),
            })
    }
}

/// Validate an ordered layer stack, topmost layer first
pub fn validate_layer_stack(stack: &[DeviceLayerKind]) -> Result<()> {
    let Some(last) = stack.last() else {
        return Err(Error::StackInvariant("layer stack is empty".to_string()));
    };
    if !last.is_physical_storage() {
        return Err(Error::StackInvariant(format!(
            "lowest layer must be a physical storage layer, found {}",
            last
        )));
    }
    let mut seen = BTreeSet::new();
    for (idx, kind) in stack.iter().enumerate() {
        if !seen.insert(*kind) {
            return Err(Error::StackInvariant(format!("layer {} occurs twice", kind)));
        }
        if kind.is_physical_storage() && idx + 1 != stack.len() {
            return Err(Error::StackInvariant(format!(
                "physical storage layer {} must be the lowest layer",
                kind
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Layer Definition Data
// =============================================================================

/// DRBD transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportType {
    Ip,
    Rdma,
}

impl TransportType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Ip => "IP",
            TransportType::Rdma => "RDMA",
        }
    }
}

impl std::str::FromStr for TransportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IP" => Ok(TransportType::Ip),
            "RDMA" => Ok(TransportType::Rdma),
            other => Err(Error::InvalidName {
                kind: "transport type",
                value: other.to_string(),
                reason: "unknown transport".to_string(),
            }),
        }
    }
}

/// DRBD data shared by every resource of one suffixed resource definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrbdRscDfnData {
    pub name: SuffixedResourceName,
    pub peer_slots: u16,
    pub al_stripes: u32,
    pub al_stripe_size_kib: u64,
    /// `None` for snapshots
    pub tcp_port: Option<TcpPortNumber>,
    pub transport: TransportType,
    pub secret: Option<String>,
}

/// DRBD data of one volume definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrbdVlmDfnData {
    pub name: SuffixedResourceName,
    pub vlm_nr: VolumeNumber,
    /// `None` for snapshots, which never become block devices
    pub minor: Option<MinorNumber>,
}

// =============================================================================
// Layer Resource Objects
// =============================================================================

/// Per-resource DRBD state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrbdRscData {
    pub node_id: NodeId,
    pub peer_slots: u16,
    pub al_stripes: u32,
    pub al_stripe_size_kib: u64,
    pub flags: u64,
}

/// Kind-specific per-resource payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum LayerRscPayload {
    Drbd(DrbdRscData),
    Luks,
    Storage,
    Nvme,
    Writecache,
    Cache,
    Bcache,
}

impl LayerRscPayload {
    pub fn kind(&self) -> DeviceLayerKind {
        match self {
            LayerRscPayload::Drbd(_) => DeviceLayerKind::Drbd,
            LayerRscPayload::Luks => DeviceLayerKind::Luks,
            LayerRscPayload::Storage => DeviceLayerKind::Storage,
            LayerRscPayload::Nvme => DeviceLayerKind::Nvme,
            LayerRscPayload::Writecache => DeviceLayerKind::Writecache,
            LayerRscPayload::Cache => DeviceLayerKind::Cache,
            LayerRscPayload::Bcache => DeviceLayerKind::Bcache,
        }
    }

    /// Payload of a kind that has no dedicated resource table
    pub fn without_table(kind: DeviceLayerKind) -> Option<Self> {
        match kind {
            DeviceLayerKind::Drbd => None,
            DeviceLayerKind::Luks => Some(LayerRscPayload::Luks),
            DeviceLayerKind::Storage => Some(LayerRscPayload::Storage),
            DeviceLayerKind::Nvme => Some(LayerRscPayload::Nvme),
            DeviceLayerKind::Writecache => Some(LayerRscPayload::Writecache),
            DeviceLayerKind::Cache => Some(LayerRscPayload::Cache),
            DeviceLayerKind::Bcache => Some(LayerRscPayload::Bcache),
        }
    }
}

/// One node of a resource's layer tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRscObject {
    pub id: LayerId,
    pub owner: ResourceKey,
    pub suffix: String,
    pub parent: Option<LayerId>,
    pub children: BTreeSet<LayerId>,
    pub suspend_io: bool,
    pub payload: LayerRscPayload,
    pub volumes: BTreeMap<VolumeNumber, LayerVlmObject>,
}

impl LayerRscObject {
    pub fn new(
        id: LayerId,
        owner: ResourceKey,
        suffix: impl Into<String>,
        parent: Option<LayerId>,
        payload: LayerRscPayload,
    ) -> Self {
        Self {
            id,
            owner,
            suffix: suffix.into(),
            parent,
            children: BTreeSet::new(),
            suspend_io: false,
            payload,
            volumes: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> DeviceLayerKind {
        self.payload.kind()
    }

    pub fn suffixed_name(&self) -> SuffixedResourceName {
        SuffixedResourceName::new(self.owner.rsc.clone(), self.owner.snap.clone(), self.suffix.clone())
    }

    pub fn drbd(&self) -> Option<&DrbdRscData> {
        match &self.payload {
            LayerRscPayload::Drbd(data) => Some(data),
            _ => None,
        }
    }
}

// =============================================================================
// Layer Volume Objects
// =============================================================================

/// Kind-specific per-volume payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum LayerVlmPayload {
    Drbd {
        /// External metadata pool, `None` for internal metadata
        meta_pool: Option<StorPoolKey>,
    },
    Luks {
        /// Volume key, already wrapped by the master key
        encrypted_password: String,
    },
    Storage {
        provider: DeviceProviderKind,
        pool: StorPoolKey,
    },
    Nvme,
    Writecache {
        cache_pool: StorPoolKey,
    },
    Cache {
        cache_pool: StorPoolKey,
        meta_pool: StorPoolKey,
    },
    Bcache {
        cache_pool: StorPoolKey,
        dev_uuid: Option<String>,
    },
}

impl LayerVlmPayload {
    pub fn kind(&self) -> DeviceLayerKind {
        match self {
            LayerVlmPayload::Drbd { .. } => DeviceLayerKind::Drbd,
            LayerVlmPayload::Luks { .. } => DeviceLayerKind::Luks,
            LayerVlmPayload::Storage { .. } => DeviceLayerKind::Storage,
            LayerVlmPayload::Nvme => DeviceLayerKind::Nvme,
            LayerVlmPayload::Writecache { .. } => DeviceLayerKind::Writecache,
            LayerVlmPayload::Cache { .. } => DeviceLayerKind::Cache,
            LayerVlmPayload::Bcache { .. } => DeviceLayerKind::Bcache,
        }
    }

    /// Storage pools this volume points at (back-references only)
    pub fn referenced_pools(&self) -> Vec<&StorPoolKey> {
        match self {
            LayerVlmPayload::Drbd { meta_pool } => meta_pool.iter().collect(),
            LayerVlmPayload::Storage { pool, .. } => vec![pool],
            LayerVlmPayload::Writecache { cache_pool } | LayerVlmPayload::Bcache { cache_pool, .. } => {
                vec![cache_pool]
            }
            LayerVlmPayload::Cache { cache_pool, meta_pool } => vec![cache_pool, meta_pool],
            LayerVlmPayload::Luks { .. } | LayerVlmPayload::Nvme => Vec::new(),
        }
    }
}

/// Per-volume data of one layer resource object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerVlmObject {
    pub layer_id: LayerId,
    pub vlm_nr: VolumeNumber,
    pub payload: LayerVlmPayload,
}

impl LayerVlmObject {
    pub fn kind(&self) -> DeviceLayerKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_layer_kind_parse() {
        for kind in DeviceLayerKind::ALL {
            assert_eq!(kind.as_str().parse::<DeviceLayerKind>().unwrap(), kind);
        }
        assert_eq!("drbd".parse::<DeviceLayerKind>().unwrap(), DeviceLayerKind::Drbd);
        assert!("OPENFLEX".parse::<DeviceLayerKind>().is_err());
    }

    #[test]
    fn test_validate_layer_stack() {
        use DeviceLayerKind::*;

        assert!(validate_layer_stack(&[Drbd, Storage]).is_ok());
        assert!(validate_layer_stack(&[Drbd, Luks, Storage]).is_ok());
        assert!(validate_layer_stack(&[Storage]).is_ok());

        assert_matches!(validate_layer_stack(&[]), Err(Error::StackInvariant(_)));
        assert_matches!(validate_layer_stack(&[Storage, Drbd]), Err(Error::StackInvariant(_)));
        assert_matches!(validate_layer_stack(&[Drbd, Luks]), Err(Error::StackInvariant(_)));
        assert_matches!(
            validate_layer_stack(&[Drbd, Drbd, Storage]),
            Err(Error::StackInvariant(_))
        );
    }

    #[test]
    fn test_payload_kinds() {
        assert_eq!(LayerRscPayload::without_table(DeviceLayerKind::Drbd), None);
        assert_eq!(
            LayerRscPayload::without_table(DeviceLayerKind::Nvme).map(|p| p.kind()),
            Some(DeviceLayerKind::Nvme)
        );
        assert!(!DeviceLayerKind::Nvme.has_volume_table());
        assert!(DeviceLayerKind::Storage.has_volume_table());
        assert!(LayerVlmPayload::Nvme.referenced_pools().is_empty());
    }
}

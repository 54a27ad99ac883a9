//! Entity Objects
//!
//! Nodes, storage pools, resource/volume definitions and resources/volumes.
//! Snapshots share the types of their live counterparts: a `Some` snapshot
//! name marks the snapshot-scoped variant.

use crate::domain::layers::DeviceLayerKind;
use crate::domain::names::{LayerId, NodeName, ResourceName, SnapshotName, StorPoolName, VolumeNumber};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// State Flags
// =============================================================================

macro_rules! state_flags {
    ($(#[$meta:meta])* $name:ident { $($flag:ident = $bit:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            $(pub const $flag: Self = Self($bit);)+

            /// Every bit known to this flag set
            pub const KNOWN: u64 = 0 $(| $bit)+;

            pub const fn empty() -> Self {
                Self(0)
            }

            /// Returns `None` if an unknown bit is set
            pub fn from_bits(bits: u64) -> Option<Self> {
                if bits & !Self::KNOWN == 0 {
                    Some(Self(bits))
                } else {
                    None
                }
            }

            pub fn bits(self) -> u64 {
                self.0
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Names of the set flags
            pub fn names(self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if self.contains(Self::$flag) {
                        names.push(stringify!($flag));
                    }
                )+
                names
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "[{}]", self.names().join(", "))
            }
        }
    };
}

state_flags!(
    /// Node state flags
    NodeFlags {
        DELETE = 1 << 0,
        EVICTED = 1 << 1,
    }
);

state_flags!(
    /// Resource definition / snapshot definition flags
    RscDfnFlags {
        DELETE = 1 << 0,
        SUCCESSFUL = 1 << 1,
    }
);

state_flags!(
    /// Resource / snapshot flags
    RscFlags {
        DELETE = 1 << 0,
        DRBD_DISKLESS = 1 << 1,
        INACTIVE = 1 << 2,
    }
);

state_flags!(
    /// Volume definition flags
    VlmDfnFlags {
        DELETE = 1 << 0,
        ENCRYPTED = 1 << 1,
        RESIZE = 1 << 2,
    }
);

state_flags!(
    /// Volume flags
    VlmFlags {
        DELETE = 1 << 0,
        RESIZE = 1 << 1,
    }
);

// =============================================================================
// Enumerations
// =============================================================================

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Controller,
    Satellite,
    Combined,
    Auxiliary,
}

impl NodeType {
    /// Persisted numeric id
    pub fn id(self) -> i64 {
        match self {
            NodeType::Controller => 1,
            NodeType::Satellite => 2,
            NodeType::Combined => 3,
            NodeType::Auxiliary => 4,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(NodeType::Controller),
            2 => Some(NodeType::Satellite),
            3 => Some(NodeType::Combined),
            4 => Some(NodeType::Auxiliary),
            _ => None,
        }
    }
}

/// Device provider backing a storage pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceProviderKind {
    Diskless,
    Lvm,
    LvmThin,
    Zfs,
    ZfsThin,
    File,
    FileThin,
    Spdk,
    Exos,
}

impl DeviceProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceProviderKind::Diskless => "DISKLESS",
            DeviceProviderKind::Lvm => "LVM",
            DeviceProviderKind::LvmThin => "LVM_THIN",
            DeviceProviderKind::Zfs => "ZFS",
            DeviceProviderKind::ZfsThin => "ZFS_THIN",
            DeviceProviderKind::File => "FILE",
            DeviceProviderKind::FileThin => "FILE_THIN",
            DeviceProviderKind::Spdk => "SPDK",
            DeviceProviderKind::Exos => "EXOS",
        }
    }

    /// Whether volumes in this pool carry data
    pub fn has_backing_device(self) -> bool {
        !matches!(self, DeviceProviderKind::Diskless)
    }
}

impl fmt::Display for DeviceProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeviceProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DISKLESS" => Ok(DeviceProviderKind::Diskless),
            "LVM" => Ok(DeviceProviderKind::Lvm),
            "LVM_THIN" => Ok(DeviceProviderKind::LvmThin),
            "ZFS" => Ok(DeviceProviderKind::Zfs),
            "ZFS_THIN" => Ok(DeviceProviderKind::ZfsThin),
            "FILE" => Ok(DeviceProviderKind::File),
            "FILE_THIN" => Ok(DeviceProviderKind::FileThin),
            "SPDK" => Ok(DeviceProviderKind::Spdk),
            "EXOS" => Ok(DeviceProviderKind::Exos),
            other => Err(Error::InvalidName {
                kind: "device provider kind",
                value: other.to_string(),
                reason: "unknown provider".to_string(),
            }),
        }
    }
}

// =============================================================================
// Natural Keys
// =============================================================================

/// (node, pool)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorPoolKey {
    pub node: NodeName,
    pub pool: StorPoolName,
}

impl StorPoolKey {
    pub fn new(node: NodeName, pool: StorPoolName) -> Self {
        Self { node, pool }
    }
}

impl fmt::Display for StorPoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.pool)
    }
}

/// (resource, snapshot)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RscDfnKey {
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
}

impl RscDfnKey {
    pub fn new(rsc: ResourceName, snap: Option<SnapshotName>) -> Self {
        Self { rsc, snap }
    }
}

impl fmt::Display for RscDfnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.snap {
            Some(snap) => write!(f, "{}/{}", self.rsc, snap),
            None => write!(f, "{}", self.rsc),
        }
    }
}

/// (resource, snapshot, volume number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VlmDfnKey {
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
    pub vlm_nr: VolumeNumber,
}

impl VlmDfnKey {
    pub fn rsc_dfn(&self) -> RscDfnKey {
        RscDfnKey::new(self.rsc.clone(), self.snap.clone())
    }
}

impl fmt::Display for VlmDfnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rsc_dfn(), self.vlm_nr)
    }
}

/// (node, resource, snapshot)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub node: NodeName,
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
}

impl ResourceKey {
    pub fn new(node: NodeName, rsc: ResourceName, snap: Option<SnapshotName>) -> Self {
        Self { node, rsc, snap }
    }

    pub fn rsc_dfn(&self) -> RscDfnKey {
        RscDfnKey::new(self.rsc.clone(), self.snap.clone())
    }

    pub fn volume(&self, vlm_nr: VolumeNumber) -> VolumeKey {
        VolumeKey {
            node: self.node.clone(),
            rsc: self.rsc.clone(),
            snap: self.snap.clone(),
            vlm_nr,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.rsc_dfn(), self.node)
    }
}

/// (node, resource, snapshot, volume number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeKey {
    pub node: NodeName,
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
    pub vlm_nr: VolumeNumber,
}

impl VolumeKey {
    pub fn resource(&self) -> ResourceKey {
        ResourceKey::new(self.node.clone(), self.rsc.clone(), self.snap.clone())
    }

    pub fn vlm_dfn(&self) -> VlmDfnKey {
        VlmDfnKey {
            rsc: self.rsc.clone(),
            snap: self.snap.clone(),
            vlm_nr: self.vlm_nr,
        }
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource(), self.vlm_nr)
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A cluster node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub uuid: Uuid,
    pub name: NodeName,
    pub node_type: NodeType,
    pub flags: NodeFlags,
}

/// A storage pool on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorPool {
    pub uuid: Uuid,
    pub node: NodeName,
    pub name: StorPoolName,
    pub provider: DeviceProviderKind,
    /// Name of the free space manager tracking this pool's capacity
    pub free_space_mgr: String,
}

impl StorPool {
    pub fn key(&self) -> StorPoolKey {
        StorPoolKey::new(self.node.clone(), self.name.clone())
    }
}

/// A resource definition, or a snapshot definition when `snap` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uuid: Uuid,
    pub name: ResourceName,
    pub snap: Option<SnapshotName>,
    /// Ordered layer kinds, topmost first
    pub layer_stack: Vec<DeviceLayerKind>,
    pub flags: RscDfnFlags,
    pub group: String,
}

impl ResourceDefinition {
    pub fn key(&self) -> RscDfnKey {
        RscDfnKey::new(self.name.clone(), self.snap.clone())
    }
}

/// A volume definition of a resource or snapshot definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDefinition {
    pub uuid: Uuid,
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
    pub vlm_nr: VolumeNumber,
    pub size_kib: u64,
    pub flags: VlmDfnFlags,
}

impl VolumeDefinition {
    pub fn key(&self) -> VlmDfnKey {
        VlmDfnKey {
            rsc: self.rsc.clone(),
            snap: self.snap.clone(),
            vlm_nr: self.vlm_nr,
        }
    }
}

/// A resource deployed on a node, or a snapshot of it when `snap` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uuid: Uuid,
    pub node: NodeName,
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
    pub flags: RscFlags,
    pub create_timestamp: Option<DateTime<Utc>>,
    /// Root of the layer tree; rebuilt from the layer rows on load
    pub layer_root: Option<LayerId>,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.node.clone(), self.rsc.clone(), self.snap.clone())
    }

    pub fn is_snapshot(&self) -> bool {
        self.snap.is_some()
    }
}

/// A volume of a resource or snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub uuid: Uuid,
    pub node: NodeName,
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
    pub vlm_nr: VolumeNumber,
    pub flags: VlmFlags,
}

impl Volume {
    pub fn key(&self) -> VolumeKey {
        VolumeKey {
            node: self.node.clone(),
            rsc: self.rsc.clone(),
            snap: self.snap.clone(),
            vlm_nr: self.vlm_nr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = RscFlags::empty();
        assert!(!flags.contains(RscFlags::DELETE));
        flags.insert(RscFlags::DELETE | RscFlags::INACTIVE);
        assert!(flags.contains(RscFlags::DELETE));
        assert_eq!(flags.names(), vec!["DELETE", "INACTIVE"]);
        flags.remove(RscFlags::DELETE);
        assert_eq!(flags.bits(), RscFlags::INACTIVE.bits());

        assert!(RscFlags::from_bits(1 << 40).is_none());
        assert_eq!(NodeFlags::from_bits(3), Some(NodeFlags::DELETE | NodeFlags::EVICTED));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("lvm_thin".parse::<DeviceProviderKind>().unwrap(), DeviceProviderKind::LvmThin);
        assert!("TAPE".parse::<DeviceProviderKind>().is_err());
        for kind in [DeviceProviderKind::Zfs, DeviceProviderKind::Diskless, DeviceProviderKind::Exos] {
            assert_eq!(kind.as_str().parse::<DeviceProviderKind>().unwrap(), kind);
        }
        assert!(!DeviceProviderKind::Diskless.has_backing_device());
    }

    #[test]
    fn test_node_type_ids() {
        for t in [NodeType::Controller, NodeType::Satellite, NodeType::Combined, NodeType::Auxiliary] {
            assert_eq!(NodeType::from_id(t.id()), Some(t));
        }
        assert_eq!(NodeType::from_id(0), None);
    }

    #[test]
    fn test_key_display() {
        let key = ResourceKey::new(
            NodeName::new("alpha").unwrap(),
            ResourceName::new("rscA").unwrap(),
            Some(SnapshotName::new("snap1").unwrap()),
        );
        assert_eq!(key.to_string(), "rscA/snap1 on alpha");
        let vlm = key.volume(VolumeNumber::new(0).unwrap());
        assert_eq!(vlm.resource(), key);
    }
}

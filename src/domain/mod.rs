//! Domain layer - value objects, entities and layer types
//!
//! Everything here is backend agnostic; the `db` module maps these types to
//! rows.

pub mod layers;
pub mod names;
pub mod objects;
pub mod security;

pub use layers::{
    validate_layer_stack, DeviceLayerKind, DrbdRscData, DrbdRscDfnData, DrbdVlmDfnData,
    LayerRscObject, LayerRscPayload, LayerVlmObject, LayerVlmPayload, TransportType,
};
pub use names::{
    LayerId, MinorNumber, NodeId, NodeName, ResourceName, SnapshotName, StorPoolName,
    SuffixedResourceName, TcpPortNumber, VolumeNumber,
};
pub use objects::{
    DeviceProviderKind, Node, NodeFlags, NodeType, Resource, ResourceDefinition, ResourceKey,
    RscDfnFlags, RscDfnKey, RscFlags, StorPool, StorPoolKey, VlmDfnFlags, VlmDfnKey, VlmFlags,
    Volume, VolumeDefinition, VolumeKey,
};
pub use security::{AccessContext, AccessPolicy, AccessType, DefaultAccessPolicy, ObjectProtection};

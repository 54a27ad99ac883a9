//! Volume driver (`VOLUMES`)

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{parse_flags, resolve_node, resolve_rsc_dfn, unresolved};
use crate::db::raw::{snapshot_key, RawRow};
use crate::db::table::volumes::*;
use crate::db::value::DbValue;
use crate::domain::names::VolumeNumber;
use crate::domain::objects::{ResourceKey, VlmFlags, Volume};
use crate::error::Result;
use uuid::Uuid;

pub fn registry() -> ColumnRegistry<Volume> {
    ColumnRegistry::<Volume>::new(&TABLE, |v| v.key().to_string())
        .register(UUID, |v| DbValue::text(v.uuid.to_string()))
        .register(NODE_NAME, |v| DbValue::text(v.node.key()))
        .register(RESOURCE_NAME, |v| DbValue::text(v.rsc.key()))
        .register(SNAPSHOT_NAME, |v| snapshot_key(v.snap.as_ref()))
        .register(VLM_NR, |v| DbValue::Int(i64::from(v.vlm_nr)))
        .register(VLM_FLAGS, |v| DbValue::Int(v.flags.bits() as i64))
}

/// Requires the owning resource and the volume definition
pub fn load(row: &RawRow, cache: &ObjectCache) -> Result<Volume> {
    let node = resolve_node(row, &NODE_NAME, cache)?;
    let rsc_dfn = resolve_rsc_dfn(row, &RESOURCE_NAME, &SNAPSHOT_NAME, cache)?;
    let owner = ResourceKey::new(node, rsc_dfn.rsc, rsc_dfn.snap);
    let owner = cache
        .resources
        .get(&owner)
        .map(|r| r.key())
        .ok_or_else(|| unresolved(row, format!("resource {}", owner)))?;

    let key = owner.volume(row.build_int_required(&VLM_NR, VolumeNumber::new)?);
    if !cache.vlm_dfns.contains_key(&key.vlm_dfn()) {
        return Err(unresolved(row, format!("volume definition {}", key.vlm_dfn())));
    }

    Ok(Volume {
        uuid: row.get_parsed::<Uuid>(&UUID)?,
        node: key.node,
        rsc: key.rsc,
        snap: key.snap,
        vlm_nr: key.vlm_nr,
        flags: row.build_int_required(&VLM_FLAGS, |bits| parse_flags("volume flags", bits, VlmFlags::from_bits))?,
    })
}

//! DRBD layer drivers
//!
//! - `LAYER_DRBD_RESOURCE_DEFINITIONS`: per suffixed resource definition
//! - `LAYER_DRBD_VOLUME_DEFINITIONS`: per suffixed volume definition
//! - `LAYER_DRBD_RESOURCES`: per DRBD layer resource object
//!
//! The DRBD per-volume table lives with the other layer volume tables.

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{int_value, resolve_rsc_dfn, unresolved};
use crate::db::raw::{snapshot_key, RawRow};
use crate::db::table::{drbd_rsc_dfns, drbd_rscs, drbd_vlm_dfns};
use crate::db::value::DbValue;
use crate::domain::layers::{DrbdRscData, DrbdRscDfnData, DrbdVlmDfnData, LayerRscObject, TransportType};
use crate::domain::names::{LayerId, MinorNumber, NodeId, SuffixedResourceName, TcpPortNumber, VolumeNumber};
use crate::domain::objects::VlmDfnKey;
use crate::error::{Error, Result};

fn ranged<T: TryFrom<i64>>(kind: &'static str, max: i64) -> impl FnOnce(i64) -> Result<T> {
    move |value| {
        if value < 0 || value > max {
            return Err(Error::ValueOutOfRange { kind, value, min: 0, max });
        }
        T::try_from(value).map_err(|_| Error::ValueOutOfRange { kind, value, min: 0, max })
    }
}

// =============================================================================
// Resource Definition Data
// =============================================================================

pub fn rsc_dfn_registry() -> ColumnRegistry<DrbdRscDfnData> {
    use drbd_rsc_dfns::*;

    ColumnRegistry::<DrbdRscDfnData>::new(&TABLE, |d| d.name.to_string())
        .register(RESOURCE_NAME, |d| DbValue::text(d.name.rsc.key()))
        .register(RESOURCE_NAME_SUFFIX, |d| DbValue::text(&d.name.suffix))
        .register(SNAPSHOT_NAME, |d| snapshot_key(d.name.snap.as_ref()))
        .register(PEER_SLOTS, |d| DbValue::Int(i64::from(d.peer_slots)))
        .register(AL_STRIPES, |d| DbValue::Int(i64::from(d.al_stripes)))
        .register(AL_STRIPE_SIZE, |d| DbValue::Int(d.al_stripe_size_kib as i64))
        .register(TCP_PORT, |d| DbValue::opt_int(d.tcp_port.map(i64::from)))
        .register(TRANSPORT_TYPE, |d| DbValue::text(d.transport.as_str()))
        .register_writable(
            SECRET,
            |d| DbValue::opt_text(d.secret.as_deref()),
            |d, v| {
                d.secret = match v {
                    DbValue::Null => None,
                    other => Some(other.to_string()),
                };
                Ok(())
            },
        )
}

/// Requires the resource or snapshot definition. Snapshot rows never hold a
/// TCP port or a secret, whatever the stored columns say.
pub fn load_rsc_dfn(row: &RawRow, cache: &ObjectCache) -> Result<DrbdRscDfnData> {
    use drbd_rsc_dfns::*;

    let rsc_dfn = resolve_rsc_dfn(row, &RESOURCE_NAME, &SNAPSHOT_NAME, cache)?;
    let (tcp_port, secret) = match rsc_dfn.snap {
        Some(_) => (None, None),
        None => (
            row.build_int(&TCP_PORT, TcpPortNumber::new)?,
            row.get_opt_string(&SECRET)?,
        ),
    };
    Ok(DrbdRscDfnData {
        name: SuffixedResourceName::new(rsc_dfn.rsc, rsc_dfn.snap, row.get_string(&RESOURCE_NAME_SUFFIX)?),
        peer_slots: row.build_int_required(&PEER_SLOTS, ranged("peer slots", i64::from(u16::MAX)))?,
        al_stripes: row.build_int_required(&AL_STRIPES, ranged("activity log stripes", i64::from(u32::MAX)))?,
        al_stripe_size_kib: row.get_u64(&AL_STRIPE_SIZE)?,
        tcp_port,
        transport: row.get_parsed::<TransportType>(&TRANSPORT_TYPE)?,
        secret,
    })
}

// =============================================================================
// Volume Definition Data
// =============================================================================

pub fn vlm_dfn_registry() -> ColumnRegistry<DrbdVlmDfnData> {
    use drbd_vlm_dfns::*;

    ColumnRegistry::<DrbdVlmDfnData>::new(&TABLE, |d| format!("{}/{}", d.name, d.vlm_nr))
        .register(RESOURCE_NAME, |d| DbValue::text(d.name.rsc.key()))
        .register(RESOURCE_NAME_SUFFIX, |d| DbValue::text(&d.name.suffix))
        .register(SNAPSHOT_NAME, |d| snapshot_key(d.name.snap.as_ref()))
        .register(VLM_NR, |d| DbValue::Int(i64::from(d.vlm_nr)))
        .register_writable(
            VLM_MINOR_NR,
            |d| DbValue::opt_int(d.minor.map(i64::from)),
            |d, v| {
                d.minor = match v {
                    DbValue::Null => None,
                    other => Some(MinorNumber::new(int_value(&other)?)?),
                };
                Ok(())
            },
        )
}

/// Requires the DRBD resource definition data and the volume definition
pub fn load_vlm_dfn(row: &RawRow, cache: &ObjectCache) -> Result<DrbdVlmDfnData> {
    use drbd_vlm_dfns::*;

    let rsc_dfn = resolve_rsc_dfn(row, &RESOURCE_NAME, &SNAPSHOT_NAME, cache)?;
    let name = SuffixedResourceName::new(rsc_dfn.rsc, rsc_dfn.snap, row.get_string(&RESOURCE_NAME_SUFFIX)?);
    if !cache.drbd_rsc_dfns.contains_key(&name) {
        return Err(unresolved(row, format!("DRBD resource definition data {}", name)));
    }

    let vlm_nr = row.build_int_required(&VLM_NR, VolumeNumber::new)?;
    let vlm_dfn = VlmDfnKey {
        rsc: name.rsc.clone(),
        snap: name.snap.clone(),
        vlm_nr,
    };
    if !cache.vlm_dfns.contains_key(&vlm_dfn) {
        return Err(unresolved(row, format!("volume definition {}", vlm_dfn)));
    }

    // Snapshots are never brought up as block devices
    let minor = match name.snap {
        Some(_) => None,
        None => row.build_int(&VLM_MINOR_NR, MinorNumber::new)?,
    };
    Ok(DrbdVlmDfnData { name, vlm_nr, minor })
}

// =============================================================================
// Layer Resource Data
// =============================================================================

fn drbd_column(layer: &LayerRscObject, get: fn(&DrbdRscData) -> i64) -> DbValue {
    layer.drbd().map_or(DbValue::Null, |data| DbValue::Int(get(data)))
}

pub fn rsc_registry() -> ColumnRegistry<LayerRscObject> {
    use drbd_rscs::*;

    ColumnRegistry::<LayerRscObject>::new(&TABLE, |l| format!("DRBD {} of {}", l.id, l.owner))
        .register(LAYER_RESOURCE_ID, |l| DbValue::Int(i64::from(l.id)))
        .register(PEER_SLOTS, |l| drbd_column(l, |d| i64::from(d.peer_slots)))
        .register(AL_STRIPES, |l| drbd_column(l, |d| i64::from(d.al_stripes)))
        .register(AL_STRIPE_SIZE, |l| drbd_column(l, |d| d.al_stripe_size_kib as i64))
        .register(FLAGS, |l| drbd_column(l, |d| d.flags as i64))
        .register(NODE_ID, |l| drbd_column(l, |d| i64::from(d.node_id)))
}

/// Per-resource DRBD payload of one layer id; the placeholder is matched by
/// the loader
pub fn load_rsc(row: &RawRow) -> Result<(LayerId, DrbdRscData)> {
    use drbd_rscs::*;

    let id = row.build_int_required(&LAYER_RESOURCE_ID, LayerId::new)?;
    Ok((
        id,
        DrbdRscData {
            node_id: row.build_int_required(&NODE_ID, NodeId::new)?,
            peer_slots: row.build_int_required(&PEER_SLOTS, ranged("peer slots", i64::from(u16::MAX)))?,
            al_stripes: row.build_int_required(&AL_STRIPES, ranged("activity log stripes", i64::from(u32::MAX)))?,
            al_stripe_size_kib: row.get_u64(&AL_STRIPE_SIZE)?,
            flags: row.get_u64(&FLAGS)?,
        },
    ))
}

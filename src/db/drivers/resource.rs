//! Resource driver (`RESOURCES`)
//!
//! Resources and snapshots share the table. The layer tree root is not a
//! column; the loader links it after the layer rows are assembled.

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{int_value, parse_flags, resolve_node, resolve_rsc_dfn};
use crate::db::raw::{snapshot_key, RawRow};
use crate::db::table::resources::*;
use crate::db::value::DbValue;
use crate::domain::objects::{Resource, RscFlags};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(Error::ValueOutOfRange {
        kind: "timestamp",
        value: millis,
        min: i64::MIN,
        max: i64::MAX,
    })
}

pub fn registry() -> ColumnRegistry<Resource> {
    ColumnRegistry::<Resource>::new(&TABLE, |r| r.key().to_string())
        .register(UUID, |r| DbValue::text(r.uuid.to_string()))
        .register(NODE_NAME, |r| DbValue::text(r.node.key()))
        .register(RESOURCE_NAME, |r| DbValue::text(r.rsc.key()))
        .register(SNAPSHOT_NAME, |r| snapshot_key(r.snap.as_ref()))
        .register_writable(
            RESOURCE_FLAGS,
            |r| DbValue::Int(r.flags.bits() as i64),
            |r, v| {
                r.flags = parse_flags("resource flags", int_value(&v)?, RscFlags::from_bits)?;
                Ok(())
            },
        )
        .register(CREATE_TIMESTAMP, |r| {
            DbValue::opt_int(r.create_timestamp.map(|ts| ts.timestamp_millis()))
        })
}

pub fn load(row: &RawRow, cache: &ObjectCache) -> Result<Resource> {
    let node = resolve_node(row, &NODE_NAME, cache)?;
    let rsc_dfn = resolve_rsc_dfn(row, &RESOURCE_NAME, &SNAPSHOT_NAME, cache)?;
    Ok(Resource {
        uuid: row.get_parsed::<Uuid>(&UUID)?,
        node,
        rsc: rsc_dfn.rsc,
        snap: rsc_dfn.snap,
        flags: row.build_int_required(&RESOURCE_FLAGS, |bits| {
            parse_flags("resource flags", bits, RscFlags::from_bits)
        })?,
        create_timestamp: row.build_int(&CREATE_TIMESTAMP, from_millis)?,
        layer_root: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::names::{NodeName, ResourceName};

    #[test]
    fn test_timestamp_millis() {
        let ts = from_millis(1_700_000_000_123).unwrap();
        let rsc = Resource {
            uuid: Uuid::new_v4(),
            node: NodeName::new("alpha").unwrap(),
            rsc: ResourceName::new("rscA").unwrap(),
            snap: None,
            flags: RscFlags::INACTIVE,
            create_timestamp: Some(ts),
            layer_root: None,
        };
        let values = registry().values(&rsc);
        assert_eq!(values["CREATE_TIMESTAMP"], DbValue::Int(1_700_000_000_123));
        assert_eq!(values["RESOURCE_FLAGS"], DbValue::Int(RscFlags::INACTIVE.bits() as i64));
    }
}

//! Volume definition driver (`VOLUME_DEFINITIONS`)

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{int_value, parse_flags, resolve_rsc_dfn};
use crate::db::raw::{snapshot_key, RawRow};
use crate::db::table::vlm_dfns::*;
use crate::db::value::DbValue;
use crate::domain::names::VolumeNumber;
use crate::domain::objects::{VlmDfnFlags, VolumeDefinition};
use crate::error::{Error, Result};
use uuid::Uuid;

pub fn registry() -> ColumnRegistry<VolumeDefinition> {
    ColumnRegistry::<VolumeDefinition>::new(&TABLE, |d| d.key().to_string())
        .register(UUID, |d| DbValue::text(d.uuid.to_string()))
        .register(RESOURCE_NAME, |d| DbValue::text(d.rsc.key()))
        .register(SNAPSHOT_NAME, |d| snapshot_key(d.snap.as_ref()))
        .register(VLM_NR, |d| DbValue::Int(i64::from(d.vlm_nr)))
        .register_writable(
            VLM_SIZE,
            |d| DbValue::Int(d.size_kib as i64),
            |d, v| {
                let size = int_value(&v)?;
                d.size_kib = u64::try_from(size).map_err(|_| Error::ValueOutOfRange {
                    kind: "volume size",
                    value: size,
                    min: 0,
                    max: i64::MAX,
                })?;
                Ok(())
            },
        )
        .register(VLM_FLAGS, |d| DbValue::Int(d.flags.bits() as i64))
}

pub fn load(row: &RawRow, cache: &ObjectCache) -> Result<VolumeDefinition> {
    let rsc_dfn = resolve_rsc_dfn(row, &RESOURCE_NAME, &SNAPSHOT_NAME, cache)?;
    Ok(VolumeDefinition {
        uuid: row.get_parsed::<Uuid>(&UUID)?,
        rsc: rsc_dfn.rsc,
        snap: rsc_dfn.snap,
        vlm_nr: row.build_int_required(&VLM_NR, VolumeNumber::new)?,
        size_kib: row.get_u64(&VLM_SIZE)?,
        flags: row.build_int_required(&VLM_FLAGS, |bits| {
            parse_flags("volume definition flags", bits, VlmDfnFlags::from_bits)
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::names::ResourceName;

    #[test]
    fn test_size_column_driver() {
        let reg = registry();
        let mut dfn = VolumeDefinition {
            uuid: Uuid::new_v4(),
            rsc: ResourceName::new("rscA").unwrap(),
            snap: None,
            vlm_nr: VolumeNumber::new(0).unwrap(),
            size_kib: 1 << 20,
            flags: VlmDfnFlags::empty(),
        };
        let driver = reg.column_driver(&VLM_SIZE).unwrap();
        driver.update(&mut dfn, DbValue::Int(2 << 20)).unwrap();
        assert_eq!(dfn.size_kib, 2 << 20);
        assert!(driver.update(&mut dfn, DbValue::Int(-1)).is_err());
        assert_eq!(reg.key_values(&dfn)["SNAPSHOT_NAME"], DbValue::text(""));
    }
}

//! Resource definition driver (`RESOURCE_DEFINITIONS`)
//!
//! Resource definitions and snapshot definitions share the table; snapshot
//! definitions carry a snapshot name and require their resource definition.

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{int_value, parse_flags, unresolved};
use crate::db::raw::{snapshot_key, RawRow, NO_SNAPSHOT};
use crate::db::table::rsc_dfns::*;
use crate::db::value::DbValue;
use crate::domain::layers::{validate_layer_stack, DeviceLayerKind};
use crate::domain::names::{ResourceName, SnapshotName};
use crate::domain::objects::{ResourceDefinition, RscDfnFlags, RscDfnKey};
use crate::error::Result;
use uuid::Uuid;

/// Persisted form of a layer stack: a JSON list of kind names
pub fn layer_stack_text(stack: &[DeviceLayerKind]) -> String {
    serde_json::Value::from(stack.iter().map(|k| k.as_str()).collect::<Vec<_>>()).to_string()
}

pub fn parse_layer_stack(text: &str) -> Result<Vec<DeviceLayerKind>> {
    let names: Vec<String> = serde_json::from_str(text)?;
    let stack = names
        .iter()
        .map(|name| name.parse::<DeviceLayerKind>())
        .collect::<Result<Vec<_>>>()?;
    validate_layer_stack(&stack)?;
    Ok(stack)
}

pub fn registry() -> ColumnRegistry<ResourceDefinition> {
    ColumnRegistry::<ResourceDefinition>::new(&TABLE, |d| d.key().to_string())
        .register(UUID, |d| DbValue::text(d.uuid.to_string()))
        .register(RESOURCE_NAME, |d| DbValue::text(d.name.key()))
        .register(SNAPSHOT_NAME, |d| snapshot_key(d.snap.as_ref()))
        .register(RESOURCE_DSP_NAME, |d| DbValue::text(d.name.display()))
        .register(SNAPSHOT_DSP_NAME, |d| DbValue::opt_text(d.snap.as_ref().map(|s| s.display())))
        .register_writable(
            RESOURCE_FLAGS,
            |d| DbValue::Int(d.flags.bits() as i64),
            |d, v| {
                d.flags = parse_flags("resource definition flags", int_value(&v)?, RscDfnFlags::from_bits)?;
                Ok(())
            },
        )
        .register(LAYER_STACK, |d| DbValue::text(layer_stack_text(&d.layer_stack)))
        .register(RESOURCE_GROUP_NAME, |d| DbValue::text(&d.group))
}

pub fn load(row: &RawRow, cache: &ObjectCache) -> Result<ResourceDefinition> {
    let rsc_key = row.get_string(&RESOURCE_NAME)?;
    let name = row.build_required(&RESOURCE_DSP_NAME, |dsp| ResourceName::with_display(&rsc_key, dsp))?;

    let snap_key = row.get_string(&SNAPSHOT_NAME)?;
    let snap = if snap_key == NO_SNAPSHOT {
        None
    } else {
        let snap = match row.build(&SNAPSHOT_DSP_NAME, |dsp| SnapshotName::with_display(&snap_key, dsp))? {
            Some(snap) => Some(snap),
            None => row.snapshot_name(&SNAPSHOT_NAME)?,
        };
        let parent = RscDfnKey::new(name.clone(), None);
        if !cache.rsc_dfns.contains_key(&parent) {
            return Err(unresolved(row, format!("resource definition {}", parent)));
        }
        snap
    };

    Ok(ResourceDefinition {
        uuid: row.get_parsed::<Uuid>(&UUID)?,
        name,
        snap,
        layer_stack: row.build_required(&LAYER_STACK, parse_layer_stack)?,
        flags: row.build_int_required(&RESOURCE_FLAGS, |bits| {
            parse_flags("resource definition flags", bits, RscDfnFlags::from_bits)
        })?,
        group: row.get_string(&RESOURCE_GROUP_NAME)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::numberpool::NumberPoolsConfig;
    use assert_matches::assert_matches;

    fn dfn(snap: Option<&str>) -> ResourceDefinition {
        ResourceDefinition {
            uuid: Uuid::new_v4(),
            name: ResourceName::new("rscA").unwrap(),
            snap: snap.map(|s| SnapshotName::new(s).unwrap()),
            layer_stack: vec![DeviceLayerKind::Drbd, DeviceLayerKind::Storage],
            flags: RscDfnFlags::empty(),
            group: "DfltRscGrp".into(),
        }
    }

    fn row_of(d: &ResourceDefinition) -> RawRow {
        RawRow::new(
            &TABLE,
            registry().values(d).into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    #[test]
    fn test_layer_stack_text() {
        let text = layer_stack_text(&[DeviceLayerKind::Drbd, DeviceLayerKind::Luks, DeviceLayerKind::Storage]);
        assert_eq!(text, r#"["DRBD","LUKS","STORAGE"]"#);
        assert_eq!(parse_layer_stack(&text).unwrap().len(), 3);
        assert_matches!(parse_layer_stack(r#"["STORAGE","DRBD"]"#), Err(Error::StackInvariant(_)));
        assert!(parse_layer_stack("DRBD,STORAGE").is_err());
    }

    #[test]
    fn test_snapshot_requires_resource_definition() {
        let mut cache = ObjectCache::new(&NumberPoolsConfig::default());
        let snap = dfn(Some("snap1"));
        assert_matches!(load(&row_of(&snap), &cache), Err(Error::UnresolvableReference { .. }));

        let live = load(&row_of(&dfn(None)), &cache).unwrap();
        assert_eq!(live.snap, None);
        cache.rsc_dfns.insert(live.key(), live);

        let loaded = load(&row_of(&snap), &cache).unwrap();
        assert_eq!(loaded, snap);
        assert_eq!(loaded.snap.unwrap().display(), "snap1");
    }

    #[test]
    fn test_bad_stack_fails_parse() {
        let mut values = registry().values(&dfn(None));
        values.insert("LAYER_STACK", DbValue::text(r#"["DRBD"]"#));
        let row = RawRow::new(&TABLE, values.into_iter().map(|(k, v)| (k.to_string(), v)).collect());
        let cache = ObjectCache::new(&NumberPoolsConfig::default());
        assert_matches!(load(&row, &cache), Err(Error::Parse { column: "LAYER_STACK", .. }));
    }
}

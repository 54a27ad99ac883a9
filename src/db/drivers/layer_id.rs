//! Layer resource id driver (`LAYER_RESOURCE_IDS`)
//!
//! One row per layer resource object of every kind. Loading a row yields a
//! [`LayerPlaceholder`]: the owner is resolved, but the parent is still a
//! bare id until the loader assembles the tree.

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{resolve_node, resolve_rsc_dfn, unresolved};
use crate::db::raw::{snapshot_key, RawRow};
use crate::db::table::layer_rsc_ids::*;
use crate::db::value::DbValue;
use crate::domain::layers::{DeviceLayerKind, LayerRscObject, LayerRscPayload};
use crate::domain::names::LayerId;
use crate::domain::objects::ResourceKey;
use crate::error::{Error, Result};

/// A loaded layer row whose tree position is not yet resolved
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPlaceholder {
    pub id: LayerId,
    pub owner: ResourceKey,
    pub kind: DeviceLayerKind,
    pub parent: Option<LayerId>,
    pub suffix: String,
    pub suspend_io: bool,
}

impl LayerPlaceholder {
    /// Exchange the placeholder for the real object
    pub fn into_object(self, payload: LayerRscPayload) -> LayerRscObject {
        let mut object = LayerRscObject::new(self.id, self.owner, self.suffix, self.parent, payload);
        object.suspend_io = self.suspend_io;
        object
    }
}

pub fn registry() -> ColumnRegistry<LayerRscObject> {
    ColumnRegistry::<LayerRscObject>::new(&TABLE, |l| format!("{} {} of {}", l.kind(), l.id, l.owner))
        .register(LAYER_RESOURCE_ID, |l| DbValue::Int(i64::from(l.id)))
        .register(NODE_NAME, |l| DbValue::text(l.owner.node.key()))
        .register(RESOURCE_NAME, |l| DbValue::text(l.owner.rsc.key()))
        .register(SNAPSHOT_NAME, |l| snapshot_key(l.owner.snap.as_ref()))
        .register(LAYER_RESOURCE_KIND, |l| DbValue::text(l.kind().as_str()))
        .register(LAYER_RESOURCE_PARENT_ID, |l| DbValue::opt_int(l.parent.map(i64::from)))
        .register(LAYER_RESOURCE_SUFFIX, |l| DbValue::text(&l.suffix))
        .register_writable(
            LAYER_RESOURCE_SUSPENDED,
            |l| DbValue::Bool(l.suspend_io),
            |l, v| {
                l.suspend_io = match v {
                    DbValue::Bool(b) => b,
                    DbValue::Int(i) => i != 0,
                    other => {
                        return Err(Error::Internal(format!("'{}' is not a boolean", other)));
                    }
                };
                Ok(())
            },
        )
}

/// Requires the owning resource or snapshot
pub fn load(row: &RawRow, cache: &ObjectCache) -> Result<LayerPlaceholder> {
    let node = resolve_node(row, &NODE_NAME, cache)?;
    let rsc_dfn = resolve_rsc_dfn(row, &RESOURCE_NAME, &SNAPSHOT_NAME, cache)?;
    let owner = ResourceKey::new(node, rsc_dfn.rsc, rsc_dfn.snap);
    let owner = cache
        .resources
        .get(&owner)
        .map(|r| r.key())
        .ok_or_else(|| unresolved(row, format!("resource {}", owner)))?;

    Ok(LayerPlaceholder {
        id: row.build_int_required(&LAYER_RESOURCE_ID, LayerId::new)?,
        owner,
        kind: row.get_parsed::<DeviceLayerKind>(&LAYER_RESOURCE_KIND)?,
        parent: row.build_int(&LAYER_RESOURCE_PARENT_ID, LayerId::new)?,
        suffix: row.get_string(&LAYER_RESOURCE_SUFFIX)?,
        suspend_io: row.get_bool(&LAYER_RESOURCE_SUSPENDED)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::names::{NodeName, ResourceName};

    #[test]
    fn test_suspend_column_driver() {
        let owner = ResourceKey::new(
            NodeName::new("alpha").unwrap(),
            ResourceName::new("rscA").unwrap(),
            None,
        );
        let mut layer = LayerRscObject::new(
            LayerId::new(3).unwrap(),
            owner,
            "",
            Some(LayerId::new(1).unwrap()),
            LayerRscPayload::Storage,
        );
        let reg = registry();
        let values = reg.values(&layer);
        assert_eq!(values["LAYER_RESOURCE_PARENT_ID"], DbValue::Int(1));
        assert_eq!(values["SNAPSHOT_NAME"], DbValue::text(""));

        let driver = reg.column_driver(&LAYER_RESOURCE_SUSPENDED).unwrap();
        driver.update(&mut layer, DbValue::Bool(true)).unwrap();
        assert!(layer.suspend_io);
        assert!(driver.update(&mut layer, DbValue::text("yes")).is_err());
    }
}

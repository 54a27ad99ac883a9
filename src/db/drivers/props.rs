//! Properties container driver (`PROPS_CONTAINERS`)
//!
//! Free-form key/value metadata, one row per (instance path, key). The
//! content is opaque to this crate; only the instance path ties a property
//! to its owner.

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::raw::RawRow;
use crate::db::table::props::*;
use crate::db::value::DbValue;
use crate::domain::names::{NodeName, ResourceName, StorPoolName, VolumeNumber};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One property row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prop {
    pub instance: String,
    pub key: String,
    pub value: String,
}

impl Prop {
    pub fn new(instance: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Instance Paths
// =============================================================================

pub fn node_instance(node: &NodeName) -> String {
    format!("/NODES/{}", node.key())
}

pub fn rsc_dfn_instance(rsc: &ResourceName) -> String {
    format!("/RESOURCEDEFINITIONS/{}", rsc.key())
}

pub fn resource_instance(node: &NodeName, rsc: &ResourceName) -> String {
    format!("/RESOURCES/{}/{}", node.key(), rsc.key())
}

pub fn vlm_dfn_instance(rsc: &ResourceName, vlm_nr: VolumeNumber) -> String {
    format!("/VOLUMEDEFINITIONS/{}/{}", rsc.key(), vlm_nr)
}

pub fn stor_pool_instance(node: &NodeName, pool: &StorPoolName) -> String {
    format!("/STORPOOLCONF/{}/{}", node.key(), pool.key())
}

// =============================================================================
// Driver
// =============================================================================

pub fn registry() -> ColumnRegistry<Prop> {
    ColumnRegistry::<Prop>::new(&TABLE, |p| format!("{}:{}", p.instance, p.key))
        .register(PROPS_INSTANCE, |p| DbValue::text(&p.instance))
        .register(PROP_KEY, |p| DbValue::text(&p.key))
        .register_writable(
            PROP_VALUE,
            |p| DbValue::text(&p.value),
            |p, v| {
                p.value = v.to_string();
                Ok(())
            },
        )
}

pub fn load(row: &RawRow, _cache: &ObjectCache) -> Result<Prop> {
    Ok(Prop {
        instance: row.get_string(&PROPS_INSTANCE)?,
        key: row.get_string(&PROP_KEY)?,
        value: row.get_string(&PROP_VALUE)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_paths() {
        let node = NodeName::new("alpha").unwrap();
        let rsc = ResourceName::new("rscA").unwrap();
        assert_eq!(node_instance(&node), "/NODES/ALPHA");
        assert_eq!(resource_instance(&node, &rsc), "/RESOURCES/ALPHA/RSCA");
        assert_eq!(vlm_dfn_instance(&rsc, VolumeNumber::new(3).unwrap()), "/VOLUMEDEFINITIONS/RSCA/3");
        assert_eq!(
            stor_pool_instance(&node, &StorPoolName::new("thin").unwrap()),
            "/STORPOOLCONF/ALPHA/THIN"
        );
    }
}

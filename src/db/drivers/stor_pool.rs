//! Storage pool driver (`NODE_STOR_POOL`)

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::resolve_node;
use crate::db::raw::RawRow;
use crate::db::table::stor_pools::*;
use crate::db::value::DbValue;
use crate::domain::names::StorPoolName;
use crate::domain::objects::{DeviceProviderKind, StorPool};
use crate::error::Result;
use uuid::Uuid;

pub fn registry() -> ColumnRegistry<StorPool> {
    ColumnRegistry::<StorPool>::new(&TABLE, |p| p.key().to_string())
        .register(UUID, |p| DbValue::text(p.uuid.to_string()))
        .register(NODE_NAME, |p| DbValue::text(p.node.key()))
        .register(POOL_NAME, |p| DbValue::text(p.name.key()))
        .register(POOL_DSP_NAME, |p| DbValue::text(p.name.display()))
        .register(DRIVER_NAME, |p| DbValue::text(p.provider.as_str()))
        .register(FREE_SPACE_MGR_NAME, |p| DbValue::text(&p.free_space_mgr))
}

pub fn load(row: &RawRow, cache: &ObjectCache) -> Result<StorPool> {
    let node = resolve_node(row, &NODE_NAME, cache)?;
    let key = row.get_string(&POOL_NAME)?;
    Ok(StorPool {
        uuid: row.get_parsed::<Uuid>(&UUID)?,
        node,
        name: row.build_required(&POOL_DSP_NAME, |dsp| StorPoolName::with_display(&key, dsp))?,
        provider: row.get_parsed::<DeviceProviderKind>(&DRIVER_NAME)?,
        free_space_mgr: row.get_string(&FREE_SPACE_MGR_NAME)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::names::NodeName;
    use crate::domain::objects::{Node, NodeFlags, NodeType};
    use crate::error::Error;
    use crate::numberpool::NumberPoolsConfig;
    use assert_matches::assert_matches;

    fn pool() -> StorPool {
        StorPool {
            uuid: Uuid::new_v4(),
            node: NodeName::new("alpha").unwrap(),
            name: StorPoolName::new("thinPool").unwrap(),
            provider: DeviceProviderKind::LvmThin,
            free_space_mgr: "alpha:thinPool".into(),
        }
    }

    fn row_of(p: &StorPool) -> RawRow {
        RawRow::new(
            &TABLE,
            registry().values(p).into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    #[test]
    fn test_load_resolves_node() {
        let mut cache = ObjectCache::new(&NumberPoolsConfig::default());
        let p = pool();
        assert_matches!(load(&row_of(&p), &cache), Err(Error::UnresolvableReference { .. }));

        let node = Node {
            uuid: Uuid::new_v4(),
            name: p.node.clone(),
            node_type: NodeType::Satellite,
            flags: NodeFlags::empty(),
        };
        cache.nodes.insert(node.name.clone(), node);
        let loaded = load(&row_of(&p), &cache).unwrap();
        assert_eq!(loaded, p);
        assert_eq!(loaded.name.display(), "thinPool");
    }
}

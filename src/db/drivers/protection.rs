//! Object protection drivers (`SEC_OBJECT_PROTECTION`, `SEC_ACL_MAP`)

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::unresolved;
use crate::db::raw::RawRow;
use crate::db::table::{sec_acl_map, sec_object_protection};
use crate::db::value::DbValue;
use crate::domain::security::{AccessType, ObjectProtection};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// One ACL row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub object_path: String,
    pub role: String,
    pub access: AccessType,
}

impl AclEntry {
    /// Every ACL row of a protection record
    pub fn of(protection: &ObjectProtection) -> Vec<AclEntry> {
        protection
            .acl
            .iter()
            .map(|(role, access)| AclEntry {
                object_path: protection.object_path.clone(),
                role: role.clone(),
                access: *access,
            })
            .collect()
    }
}

pub fn registry() -> ColumnRegistry<ObjectProtection> {
    use sec_object_protection::*;

    ColumnRegistry::<ObjectProtection>::new(&TABLE, |p| p.object_path.clone())
        .register(OBJECT_PATH, |p| DbValue::text(&p.object_path))
        .register(CREATOR_IDENTITY_NAME, |p| DbValue::text(&p.creator))
        .register(OWNER_ROLE_NAME, |p| DbValue::text(&p.owner_role))
        .register(SECURITY_TYPE_NAME, |p| DbValue::text(&p.security_type))
}

pub fn acl_registry() -> ColumnRegistry<AclEntry> {
    use sec_acl_map::*;

    ColumnRegistry::<AclEntry>::new(&TABLE, |e| format!("{}:{}", e.object_path, e.role))
        .register(OBJECT_PATH, |e| DbValue::text(&e.object_path))
        .register(ROLE_NAME, |e| DbValue::text(&e.role))
        .register(ACCESS_TYPE, |e| DbValue::Int(e.access.id()))
}

/// Load a protection record with an empty ACL
pub fn load(row: &RawRow, _cache: &ObjectCache) -> Result<ObjectProtection> {
    use sec_object_protection::*;

    Ok(ObjectProtection {
        object_path: row.get_string(&OBJECT_PATH)?,
        creator: row.get_string(&CREATOR_IDENTITY_NAME)?,
        owner_role: row.get_string(&OWNER_ROLE_NAME)?,
        security_type: row.get_string(&SECURITY_TYPE_NAME)?,
        acl: BTreeMap::new(),
    })
}

/// Requires the protection record the entry belongs to
pub fn load_acl(row: &RawRow, cache: &ObjectCache) -> Result<AclEntry> {
    use sec_acl_map::*;

    let object_path = row.get_string(&OBJECT_PATH)?;
    if !cache.protections.contains_key(&object_path) {
        return Err(unresolved(row, format!("object protection {}", object_path)));
    }
    Ok(AclEntry {
        object_path,
        role: row.get_string(&ROLE_NAME)?,
        access: row.build_int_required(&ACCESS_TYPE, |id| {
            AccessType::from_id(id).ok_or_else(|| Error::InvalidName {
                kind: "access type",
                value: id.to_string(),
                reason: "unknown access type id".to_string(),
            })
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::security::{AccessContext, NODES_MAP_PATH};
    use crate::numberpool::NumberPoolsConfig;
    use assert_matches::assert_matches;

    #[test]
    fn test_acl_rows() {
        let protection = ObjectProtection::container(NODES_MAP_PATH);
        let entries = AclEntry::of(&protection);
        assert_eq!(entries.len(), 2);

        let values = acl_registry().values(&entries[0]);
        let row = RawRow::new(
            &sec_acl_map::TABLE,
            values.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        );

        let mut cache = ObjectCache::new(&NumberPoolsConfig::default());
        assert_matches!(load_acl(&row, &cache), Err(Error::UnresolvableReference { .. }));
        cache.protections.insert(protection.object_path.clone(), protection);
        assert_eq!(load_acl(&row, &cache).unwrap(), entries[0]);
    }

    #[test]
    fn test_protection_columns() {
        let protection = ObjectProtection::new("/nodes/ALPHA", &AccessContext::new("alice", "ops"));
        let values = registry().values(&protection);
        assert_eq!(values["OWNER_ROLE_NAME"], DbValue::text("ops"));
        assert_eq!(values["CREATOR_IDENTITY_NAME"], DbValue::text("alice"));
    }
}

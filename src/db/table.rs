//! Table Catalogue
//!
//! Table and column names are the wire contract with the storage substrate:
//! the relational engine uses them as SQL identifiers, the key-value engine as
//! key segments and the declarative engine as record field names.

use std::fmt;

/// Column value type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    BigInt,
    Bool,
}

impl SqlType {
    pub fn sql_name(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::BigInt => "BIGINT",
            SqlType::Bool => "BOOLEAN",
        }
    }
}

/// One column of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub nullable: bool,
}

impl Column {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            primary_key: false,
            nullable: false,
        }
    }

    pub const fn pk(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn null(mut self) -> Self {
        self.nullable = true;
        self
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A persisted table
#[derive(Debug)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl Table {
    pub fn primary_key(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Table {}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

macro_rules! table {
    ($(#[$meta:meta])* $module:ident, $name:literal { $($col:ident : $ty:ident $($flag:ident)*),+ $(,)? }) => {
        $(#[$meta])*
        pub mod $module {
            use super::{Column, SqlType, Table};

            $(pub const $col: Column = Column::new(stringify!($col), SqlType::$ty)$(.$flag())*;)+

            pub static TABLE: Table = Table {
                name: $name,
                columns: &[$($col),+],
            };
        }
    };
}

// =============================================================================
// Entity Tables
// =============================================================================

table!(nodes, "NODES" {
    UUID: Text,
    NODE_NAME: Text pk,
    NODE_DSP_NAME: Text,
    NODE_FLAGS: BigInt,
    NODE_TYPE: BigInt,
});

table!(stor_pools, "NODE_STOR_POOL" {
    UUID: Text,
    NODE_NAME: Text pk,
    POOL_NAME: Text pk,
    POOL_DSP_NAME: Text,
    DRIVER_NAME: Text,
    FREE_SPACE_MGR_NAME: Text,
});

table!(
    /// Resource definitions and snapshot definitions
    rsc_dfns, "RESOURCE_DEFINITIONS" {
    UUID: Text,
    RESOURCE_NAME: Text pk,
    SNAPSHOT_NAME: Text pk,
    RESOURCE_DSP_NAME: Text,
    SNAPSHOT_DSP_NAME: Text null,
    RESOURCE_FLAGS: BigInt,
    LAYER_STACK: Text,
    RESOURCE_GROUP_NAME: Text,
});

table!(vlm_dfns, "VOLUME_DEFINITIONS" {
    UUID: Text,
    RESOURCE_NAME: Text pk,
    SNAPSHOT_NAME: Text pk,
    VLM_NR: BigInt pk,
    VLM_SIZE: BigInt,
    VLM_FLAGS: BigInt,
});

table!(
    /// Resources and snapshots
    resources, "RESOURCES" {
    UUID: Text,
    NODE_NAME: Text pk,
    RESOURCE_NAME: Text pk,
    SNAPSHOT_NAME: Text pk,
    RESOURCE_FLAGS: BigInt,
    CREATE_TIMESTAMP: BigInt null,
});

table!(volumes, "VOLUMES" {
    UUID: Text,
    NODE_NAME: Text pk,
    RESOURCE_NAME: Text pk,
    SNAPSHOT_NAME: Text pk,
    VLM_NR: BigInt pk,
    VLM_FLAGS: BigInt,
});

table!(props, "PROPS_CONTAINERS" {
    PROPS_INSTANCE: Text pk,
    PROP_KEY: Text pk,
    PROP_VALUE: Text,
});

table!(sec_object_protection, "SEC_OBJECT_PROTECTION" {
    OBJECT_PATH: Text pk,
    CREATOR_IDENTITY_NAME: Text,
    OWNER_ROLE_NAME: Text,
    SECURITY_TYPE_NAME: Text,
});

table!(sec_acl_map, "SEC_ACL_MAP" {
    OBJECT_PATH: Text pk,
    ROLE_NAME: Text pk,
    ACCESS_TYPE: BigInt,
});

// =============================================================================
// Layer Tables
// =============================================================================

table!(layer_rsc_ids, "LAYER_RESOURCE_IDS" {
    LAYER_RESOURCE_ID: BigInt pk,
    NODE_NAME: Text,
    RESOURCE_NAME: Text,
    SNAPSHOT_NAME: Text,
    LAYER_RESOURCE_KIND: Text,
    LAYER_RESOURCE_PARENT_ID: BigInt null,
    LAYER_RESOURCE_SUFFIX: Text,
    LAYER_RESOURCE_SUSPENDED: Bool,
});

table!(drbd_rsc_dfns, "LAYER_DRBD_RESOURCE_DEFINITIONS" {
    RESOURCE_NAME: Text pk,
    RESOURCE_NAME_SUFFIX: Text pk,
    SNAPSHOT_NAME: Text pk,
    PEER_SLOTS: BigInt,
    AL_STRIPES: BigInt,
    AL_STRIPE_SIZE: BigInt,
    TCP_PORT: BigInt null,
    TRANSPORT_TYPE: Text,
    SECRET: Text null,
});

table!(drbd_vlm_dfns, "LAYER_DRBD_VOLUME_DEFINITIONS" {
    RESOURCE_NAME: Text pk,
    RESOURCE_NAME_SUFFIX: Text pk,
    SNAPSHOT_NAME: Text pk,
    VLM_NR: BigInt pk,
    VLM_MINOR_NR: BigInt null,
});

table!(drbd_rscs, "LAYER_DRBD_RESOURCES" {
    LAYER_RESOURCE_ID: BigInt pk,
    PEER_SLOTS: BigInt,
    AL_STRIPES: BigInt,
    AL_STRIPE_SIZE: BigInt,
    FLAGS: BigInt,
    NODE_ID: BigInt,
});

table!(drbd_vlms, "LAYER_DRBD_VOLUMES" {
    LAYER_RESOURCE_ID: BigInt pk,
    VLM_NR: BigInt pk,
    NODE_NAME: Text null,
    POOL_NAME: Text null,
});

table!(luks_vlms, "LAYER_LUKS_VOLUMES" {
    LAYER_RESOURCE_ID: BigInt pk,
    VLM_NR: BigInt pk,
    ENCRYPTED_PASSWORD: Text,
});

table!(storage_vlms, "LAYER_STORAGE_VOLUMES" {
    LAYER_RESOURCE_ID: BigInt pk,
    VLM_NR: BigInt pk,
    PROVIDER_KIND: Text,
    NODE_NAME: Text,
    STOR_POOL_NAME: Text,
});

table!(writecache_vlms, "LAYER_WRITECACHE_VOLUMES" {
    LAYER_RESOURCE_ID: BigInt pk,
    VLM_NR: BigInt pk,
    NODE_NAME: Text,
    POOL_NAME: Text,
});

table!(cache_vlms, "LAYER_CACHE_VOLUMES" {
    LAYER_RESOURCE_ID: BigInt pk,
    VLM_NR: BigInt pk,
    NODE_NAME: Text,
    POOL_NAME_CACHE: Text,
    POOL_NAME_META: Text,
});

table!(bcache_vlms, "LAYER_BCACHE_VOLUMES" {
    LAYER_RESOURCE_ID: BigInt pk,
    VLM_NR: BigInt pk,
    NODE_NAME: Text,
    POOL_NAME: Text,
    DEV_UUID: Text null,
});

/// Every table, in load order
pub static ALL_TABLES: [&Table; 19] = [
    &sec_object_protection::TABLE,
    &sec_acl_map::TABLE,
    &nodes::TABLE,
    &stor_pools::TABLE,
    &props::TABLE,
    &rsc_dfns::TABLE,
    &resources::TABLE,
    &vlm_dfns::TABLE,
    &volumes::TABLE,
    &drbd_rsc_dfns::TABLE,
    &drbd_vlm_dfns::TABLE,
    &layer_rsc_ids::TABLE,
    &drbd_rscs::TABLE,
    &drbd_vlms::TABLE,
    &luks_vlms::TABLE,
    &storage_vlms::TABLE,
    &writecache_vlms::TABLE,
    &cache_vlms::TABLE,
    &bcache_vlms::TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_keys() {
        let pks: Vec<_> = vlm_dfns::TABLE.primary_key().map(|c| c.name).collect();
        assert_eq!(pks, vec!["RESOURCE_NAME", "SNAPSHOT_NAME", "VLM_NR"]);
        assert!(drbd_vlm_dfns::VLM_MINOR_NR.nullable);
        assert!(!drbd_vlm_dfns::VLM_MINOR_NR.primary_key);
    }

    #[test]
    fn test_every_table_has_primary_key() {
        for table in ALL_TABLES {
            assert!(table.primary_key().count() > 0, "{} has no primary key", table);
            assert!(table.primary_key().all(|c| !c.nullable), "{} has a nullable key", table);
        }
    }
}

//! Node driver (`NODES`)

use crate::cache::ObjectCache;
use crate::db::columns::ColumnRegistry;
use crate::db::drivers::{int_value, parse_flags};
use crate::db::raw::RawRow;
use crate::db::table::nodes::*;
use crate::db::value::DbValue;
use crate::domain::names::NodeName;
use crate::domain::objects::{Node, NodeFlags, NodeType};
use crate::error::{Error, Result};
use uuid::Uuid;

pub fn registry() -> ColumnRegistry<Node> {
    ColumnRegistry::<Node>::new(&TABLE, |n| n.name.to_string())
        .register(UUID, |n| DbValue::text(n.uuid.to_string()))
        .register(NODE_NAME, |n| DbValue::text(n.name.key()))
        .register(NODE_DSP_NAME, |n| DbValue::text(n.name.display()))
        .register_writable(
            NODE_FLAGS,
            |n| DbValue::Int(n.flags.bits() as i64),
            |n, v| {
                n.flags = parse_flags("node flags", int_value(&v)?, NodeFlags::from_bits)?;
                Ok(())
            },
        )
        .register(NODE_TYPE, |n| DbValue::Int(n.node_type.id()))
}

/// Nodes have no parents; nothing is resolved
pub fn load(row: &RawRow, _cache: &ObjectCache) -> Result<Node> {
    let key = row.get_string(&NODE_NAME)?;
    let name = row.build_required(&NODE_DSP_NAME, |dsp| NodeName::with_display(&key, dsp))?;

    Ok(Node {
        uuid: row.get_parsed::<Uuid>(&UUID)?,
        name,
        node_type: row.build_int_required(&NODE_TYPE, |id| {
            NodeType::from_id(id).ok_or_else(|| Error::InvalidName {
                kind: "node type",
                value: id.to_string(),
                reason: "unknown node type id".to_string(),
            })
        })?,
        flags: row.build_int_required(&NODE_FLAGS, |bits| parse_flags("node flags", bits, NodeFlags::from_bits))?,
    })
}

//! Column Mapping Registry
//!
//! Per-entity table of named columns. Each column has a pure getter
//! (entity -> persisted value) and optionally a setter; writable columns can
//! be handed out as a [`ColumnDriver`] that updates exactly one column.
//! Persisting an entity is always "evaluate every registered getter".

use crate::db::engine::WriteOp;
use crate::db::table::{Column, Table};
use crate::db::value::{DbValue, RowValues};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::trace;

/// Pure accessor reading one column value from an entity
pub type Getter<E> = fn(&E) -> DbValue;

/// Mutator applying one column value to an entity
pub type Setter<E> = fn(&mut E, DbValue) -> Result<()>;

struct Mapping<E> {
    column: Column,
    getter: Getter<E>,
    setter: Option<Setter<E>>,
}

/// Column mappings of one entity type onto one table
pub struct ColumnRegistry<E> {
    table: &'static Table,
    id: fn(&E) -> String,
    mappings: Vec<Mapping<E>>,
    index: BTreeMap<&'static str, usize>,
}

impl<E> ColumnRegistry<E> {
    /// `id` renders a stable human-readable identity for diagnostics
    pub fn new(table: &'static Table, id: fn(&E) -> String) -> Self {
        Self {
            table,
            id,
            mappings: Vec::with_capacity(table.columns.len()),
            index: BTreeMap::new(),
        }
    }

    pub fn register(self, column: Column, getter: Getter<E>) -> Self {
        self.insert(column, getter, None)
    }

    pub fn register_writable(self, column: Column, getter: Getter<E>, setter: Setter<E>) -> Self {
        self.insert(column, getter, Some(setter))
    }

    fn insert(mut self, column: Column, getter: Getter<E>, setter: Option<Setter<E>>) -> Self {
        debug_assert!(
            self.table.column(column.name).is_some(),
            "column {} does not belong to {}",
            column,
            self.table
        );
        self.index.insert(column.name, self.mappings.len());
        self.mappings.push(Mapping {
            column,
            getter,
            setter,
        });
        self
    }

    pub fn table(&self) -> &'static Table {
        self.table
    }

    pub fn id(&self, entity: &E) -> String {
        (self.id)(entity)
    }

    /// Evaluate every registered getter
    pub fn values(&self, entity: &E) -> RowValues {
        self.mappings
            .iter()
            .map(|m| (m.column.name, (m.getter)(entity)))
            .collect()
    }

    /// Evaluate the primary key getters only
    pub fn key_values(&self, entity: &E) -> RowValues {
        self.mappings
            .iter()
            .filter(|m| m.column.primary_key)
            .map(|m| (m.column.name, (m.getter)(entity)))
            .collect()
    }

    /// Full-row write of the entity
    pub fn upsert(&self, entity: &E) -> WriteOp {
        WriteOp::Upsert {
            table: self.table,
            values: self.values(entity),
        }
    }

    /// Delete of the entity's row
    pub fn delete(&self, entity: &E) -> WriteOp {
        WriteOp::Delete {
            table: self.table,
            key: self.key_values(entity),
        }
    }

    /// Narrow update function bound to one writable column
    pub fn column_driver(&self, column: &Column) -> Result<ColumnDriver<'_, E>> {
        let mapping = self
            .index
            .get(column.name)
            .map(|idx| &self.mappings[*idx])
            .ok_or_else(|| Error::Internal(format!("column {} of {} is not registered", column, self.table)))?;
        let setter = mapping
            .setter
            .ok_or_else(|| Error::Internal(format!("column {} of {} is not writable", column, self.table)))?;
        Ok(ColumnDriver {
            registry: self,
            column: mapping.column,
            getter: mapping.getter,
            setter,
        })
    }

    /// Check that every column of the table has a getter
    pub fn ensure_complete(&self) -> Result<()> {
        match self.table.columns.iter().find(|c| !self.index.contains_key(c.name)) {
            Some(missing) => Err(Error::Internal(format!(
                "column {} of {} has no mapping",
                missing, self.table
            ))),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Single Column Driver
// =============================================================================

/// Updates one column of one entity
pub struct ColumnDriver<'a, E> {
    registry: &'a ColumnRegistry<E>,
    column: Column,
    getter: Getter<E>,
    setter: Setter<E>,
}

impl<'a, E> ColumnDriver<'a, E> {
    pub fn column(&self) -> &Column {
        &self.column
    }

    /// Apply the value to the entity and return the matching write
    pub fn update(&self, entity: &mut E, value: DbValue) -> Result<WriteOp> {
        let old = (self.getter)(entity);
        (self.setter)(entity, value)?;
        let new = (self.getter)(entity);
        trace!(
            "Updating {}'s {} from [{}] to [{}] ({})",
            self.registry.table,
            self.column,
            old,
            new,
            self.registry.id(entity)
        );
        Ok(WriteOp::Update {
            table: self.registry.table,
            key: self.registry.key_values(entity),
            column: self.column,
            value: new,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table::props;
    use assert_matches::assert_matches;

    #[derive(Debug, Clone)]
    struct Prop {
        instance: String,
        key: String,
        value: String,
    }

    fn registry() -> ColumnRegistry<Prop> {
        ColumnRegistry::<Prop>::new(&props::TABLE, |p| format!("{}:{}", p.instance, p.key))
            .register(props::PROPS_INSTANCE, |p| DbValue::text(&p.instance))
            .register(props::PROP_KEY, |p| DbValue::text(&p.key))
            .register_writable(
                props::PROP_VALUE,
                |p| DbValue::text(&p.value),
                |p, v| {
                    p.value = v.to_string();
                    Ok(())
                },
            )
    }

    fn prop() -> Prop {
        Prop {
            instance: "/NODES/ALPHA".into(),
            key: "Aux/site".into(),
            value: "east".into(),
        }
    }

    #[test]
    fn test_values_and_keys() {
        let reg = registry();
        reg.ensure_complete().unwrap();

        let values = reg.values(&prop());
        assert_eq!(values.len(), 3);
        assert_eq!(values["PROP_VALUE"], DbValue::text("east"));

        let key = reg.key_values(&prop());
        assert_eq!(key.len(), 2);
        assert!(!key.contains_key("PROP_VALUE"));
    }

    #[test]
    fn test_column_driver_update() {
        let reg = registry();
        let mut p = prop();
        let driver = reg.column_driver(&props::PROP_VALUE).unwrap();
        let op = driver.update(&mut p, DbValue::text("west")).unwrap();

        assert_eq!(p.value, "west");
        match op {
            WriteOp::Update { column, value, key, .. } => {
                assert_eq!(column, props::PROP_VALUE);
                assert_eq!(value, DbValue::text("west"));
                assert_eq!(key.len(), 2);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_read_only_column_has_no_driver() {
        let reg = registry();
        assert_matches!(reg.column_driver(&props::PROP_KEY).err(), Some(Error::Internal(_)));
    }

    #[test]
    fn test_incomplete_registry() {
        let reg = ColumnRegistry::<Prop>::new(&props::TABLE, |p| p.key.clone())
            .register(props::PROP_KEY, |p| DbValue::text(&p.key));
        assert!(reg.ensure_complete().is_err());
    }
}
